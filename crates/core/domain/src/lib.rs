pub mod data;

pub use data::{Datapoint, DatapointValue, Message, Reading};

/// 嵌套对象的读数生成策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// 单条读数，只取顶层标量。
    #[default]
    FirstLevelOnly,
    /// 单条读数，嵌套成员平铺到同一层。
    CollapseSingle,
    /// 单条读数，嵌套对象保留为嵌套数据点。
    NestSingle,
    /// 顶层标量一条主读数，每个顶层嵌套对象一条独立读数（平铺）。
    CollapseMultiple,
    /// 同上，嵌套对象内部保留嵌套结构。
    NestMultiple,
}

impl Policy {
    pub const ALL: [Policy; 5] = [
        Policy::FirstLevelOnly,
        Policy::CollapseSingle,
        Policy::NestSingle,
        Policy::CollapseMultiple,
        Policy::NestMultiple,
    ];

    /// 配置界面中的显示名称。
    pub fn display_name(&self) -> &'static str {
        match self {
            Policy::FirstLevelOnly => "Single reading with first level only",
            Policy::CollapseSingle => "Single reading collapsed",
            Policy::NestSingle => "Single reading nested",
            Policy::CollapseMultiple => "Multiple readings collapsed",
            Policy::NestMultiple => "Multiple readings nested",
        }
    }

    pub fn identifier(&self) -> &'static str {
        match self {
            Policy::FirstLevelOnly => "first-level-only",
            Policy::CollapseSingle => "collapse-single",
            Policy::NestSingle => "nest-single",
            Policy::CollapseMultiple => "collapse-multiple",
            Policy::NestMultiple => "nest-multiple",
        }
    }

    /// 接受显示名称或短标识（忽略大小写与首尾空白）。
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|policy| {
            policy.display_name().eq_ignore_ascii_case(value)
                || policy.identifier().eq_ignore_ascii_case(value)
        })
    }

    /// 嵌套对象是否保留为嵌套数据点。
    pub fn nests(&self) -> bool {
        matches!(self, Policy::NestSingle | Policy::NestMultiple)
    }

    pub fn emits_multiple(&self) -> bool {
        matches!(self, Policy::CollapseMultiple | Policy::NestMultiple)
    }
}
