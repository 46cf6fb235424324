//! 커널 간 일관성 테스트: 유한 차분, 순서 무관성, 보간 기하 성질.

use crate::ops::plan::{IndexingMode, LevelPlan};

pub mod property_test;

/// 밀집 레벨 하나와 해시 레벨 하나를 갖는 작은 계획.
pub(crate) fn mixed_plan() -> LevelPlan {
    // 레벨 0: scale 3, res 4, 64 슬롯 (밀집)
    // 레벨 1: scale 7, res 8, 512 > 64 (해시)
    LevelPlan::build(4, 2, 2.0, 64, 2)
}

#[test]
fn test_mixed_plan_형태() {
    let plan = mixed_plan();
    assert_eq!(plan.levels()[0].mode, IndexingMode::Dense);
    assert_eq!(plan.levels()[1].mode, IndexingMode::Hashed);
    assert_eq!(plan.total_slots(), 128);
    assert_eq!(plan.num_parameters(), 256);
}
