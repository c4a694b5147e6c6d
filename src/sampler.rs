use crate::scene_detector::Scene;

/// 场景内的采样时间点
///
/// 只采一帧或场景时长（秒）小于采样数时取中点，否则从 start 到 end（含两端）等距取 `count` 个点。
/// 至少返回一个时间点。
pub fn sample_timestamps(scene: &Scene, count: usize) -> Vec<f64> {
    if count <= 1 || scene.duration < count as f64 {
        return vec![scene.midpoint()];
    }

    let step = (scene.end - scene.start) / (count - 1) as f64;
    (0..count)
        .map(|i| {
            if i == count - 1 {
                scene.end
            } else {
                scene.start + step * i as f64
            }
        })
        .collect()
}
