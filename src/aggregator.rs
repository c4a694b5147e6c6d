use serde::Serialize;

use crate::scene_detector::Scene;
use crate::scoring::ScoreSample;

/// 场景的平均分数
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SceneAnalysis {
    pub nudity: f64,
    pub immodesty: f64,
    pub violence: f64,
    /// 三项平均分中的最大值；为 0 表示该场景没有任何成功的评分
    pub confidence: f64,
}

impl SceneAnalysis {
    /// 无法评分的场景：全部为 0
    pub fn unscored() -> Self {
        Self::default()
    }
}

/// 单个场景的最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneResult {
    #[serde(skip)]
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub analysis: SceneAnalysis,
}

impl SceneResult {
    pub fn new(scene: &Scene, analysis: SceneAnalysis) -> Self {
        Self {
            index: scene.index,
            start: scene.start,
            end: scene.end,
            duration: scene.duration,
            analysis,
        }
    }

    /// 场景整体失败时的兜底结果
    pub fn unscored(scene: &Scene) -> Self {
        Self::new(scene, SceneAnalysis::unscored())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// 汇总场景内各帧的评分
///
/// 每一项只对报告了该项的样本取平均，缺失的不按 0 计入。
/// 没有任何样本报告任何一项时，返回全 0 的结果而不是省略该场景。
pub fn aggregate(scene: &Scene, samples: &[ScoreSample]) -> SceneResult {
    let nudity = mean(samples.iter().filter_map(|s| s.nudity));
    let immodesty = mean(samples.iter().filter_map(|s| s.immodesty));
    let violence = mean(samples.iter().filter_map(|s| s.violence));

    if nudity.is_none() && immodesty.is_none() && violence.is_none() {
        return SceneResult::unscored(scene);
    }

    let nudity = nudity.unwrap_or(0.0).clamp(0.0, 1.0);
    let immodesty = immodesty.unwrap_or(0.0).clamp(0.0, 1.0);
    let violence = violence.unwrap_or(0.0).clamp(0.0, 1.0);

    SceneResult::new(
        scene,
        SceneAnalysis {
            nudity,
            immodesty,
            violence,
            confidence: nudity.max(immodesty).max(violence),
        },
    )
}
