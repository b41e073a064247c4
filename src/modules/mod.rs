pub mod review_bot;
pub mod reviews;
