use rand::Rng;

/// A synthetic-player archetype. The registry is fixed at compile time; all
/// selection is a pure function of the injected random source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    pub key: &'static str,
    pub label: &'static str,
    pub background: &'static str,
    pub tone: &'static str,
    pub min_hours: i32,
    pub max_hours: i32,
}

pub const PERSONAS: &[Persona] = &[
    Persona {
        key: "student",
        label: "学生党",
        background: "大学在读，课余时间碎片化，喜欢利用午休和晚上宿舍时间上线刷副本",
        tone: "轻快随性，偶尔夹杂网络流行语",
        min_hours: 120,
        max_hours: 800,
    },
    Persona {
        key: "office_worker",
        label: "上班族",
        background: "互联网公司社畜，通勤和睡前是主要游戏时间，看重挂机和日常任务效率",
        tone: "务实直接，关注肝度和氪金性价比",
        min_hours: 100,
        max_hours: 600,
    },
    Persona {
        key: "lore_fan",
        label: "剧情党",
        background: "被世界观和主线剧情吸引入坑，收集所有档案文本，关注版本剧情更新",
        tone: "文艺细腻，喜欢引用游戏内的台词",
        min_hours: 300,
        max_hours: 1500,
    },
    Persona {
        key: "veteran",
        label: "手游老兵",
        background: "十年手游龄，经历过多款大作的开服与关服，对数值和运营活动非常敏感",
        tone: "老练毒舌但不失公允，喜欢横向对比其他游戏",
        min_hours: 1000,
        max_hours: 4000,
    },
    Persona {
        key: "guild_player",
        label: "公会社交玩家",
        background: "跟朋友一起入坑，常驻公会语音，最期待每周的公会战和团队副本",
        tone: "热情外向，张口闭口都是公会里的趣事",
        min_hours: 400,
        max_hours: 2000,
    },
    Persona {
        key: "casual",
        label: "休闲玩家",
        background: "偶尔上线看看风景钓钓鱼，不追进度不打排行，纯粹图个放松",
        tone: "佛系平和，语气轻描淡写",
        min_hours: 50,
        max_hours: 350,
    },
];

/// Uniform draw from the fixed registry.
pub fn select_persona<R: Rng + ?Sized>(rng: &mut R) -> &'static Persona {
    let idx = rng.gen_range(0..PERSONAS.len());
    &PERSONAS[idx]
}

/// Simulated play hours within the persona's declared range.
pub fn simulated_play_hours<R: Rng + ?Sized>(persona: &Persona, rng: &mut R) -> i32 {
    rng.gen_range(persona.min_hours..=persona.max_hours)
}

/// One-line rendering used in prompt construction.
pub fn describe(persona: &Persona) -> String {
    format!(
        "{}：{}。说话风格：{}",
        persona.label, persona.background, persona.tone
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn registry_holds_six_archetypes() {
        assert_eq!(PERSONAS.len(), 6);
    }

    #[test]
    fn play_hours_stay_within_declared_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for persona in PERSONAS {
            for _ in 0..200 {
                let hours = simulated_play_hours(persona, &mut rng);
                assert!(
                    hours >= persona.min_hours && hours <= persona.max_hours,
                    "{}: {} outside [{}, {}]",
                    persona.key,
                    hours,
                    persona.min_hours,
                    persona.max_hours
                );
            }
        }
    }

    #[test]
    fn selection_covers_the_whole_registry() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(select_persona(&mut rng).key);
        }
        assert_eq!(seen.len(), PERSONAS.len());
    }
}
