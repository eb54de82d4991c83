//! Detector set - configured region detectors and their per-session state
//!
//! The set is built once from configuration. Each session loads its own
//! cascade handles, runs them on the downscaled working buffer, and maps the
//! regions back to full resolution. Crops are only saved when a detector sees
//! more regions in one frame than it has seen in any earlier frame.

use crate::domain::frame::{Color, Frame, Rect};
use crate::infra::config::{Config, DetectParams, DetectorSettings};
use crate::io::detection::{Cascade, DetectRequest, DetectionEngine};
use tracing::{debug, error, info, trace};

/// How a detector's regions are drawn on the live preview
#[derive(Debug, Clone, PartialEq)]
pub struct DrawStyle {
    pub annotation: String,
    pub color: Color,
    pub thickness: u32,
    pub render_as_circle: bool,
}

impl DrawStyle {
    fn from_settings(settings: &DetectorSettings) -> Self {
        Self {
            annotation: settings.annotation.clone(),
            color: Color::from_rgb_u32(settings.color),
            thickness: settings.thickness,
            render_as_circle: settings.render_as_circle,
        }
    }
}

/// Enabled detectors, in category order
#[derive(Debug, Clone, Default)]
pub struct DetectorSet {
    detectors: Vec<DetectorSettings>,
}

impl DetectorSet {
    pub fn new(detectors: Vec<DetectorSettings>) -> Self {
        Self { detectors }
    }

    pub fn from_config(config: &Config) -> Self {
        let set = Self::new(config.detectors().to_vec());
        info!(
            detectors = ?set.detectors.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "detector_set_configured"
        );
        set
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Load a cascade per detector with fresh counters
    ///
    /// A detector whose cascade fails to load is logged and left out of this
    /// session. Without an engine no detector is active.
    pub fn load(&self, engine: Option<&dyn DetectionEngine>) -> Vec<ActiveDetector> {
        let Some(engine) = engine else {
            return Vec::new();
        };

        self.detectors
            .iter()
            .filter_map(|settings| match engine.load(&settings.source_file) {
                Ok(cascade) => {
                    debug!(name = %settings.name, file = %settings.source_file.display(), "cascade_loaded");
                    Some(ActiveDetector::new(settings, cascade))
                }
                Err(e) => {
                    error!(
                        name = %settings.name,
                        file = %settings.source_file.display(),
                        error = %e,
                        "cascade_load_failed"
                    );
                    None
                }
            })
            .collect()
    }
}

/// Decides when a detector saves crops
///
/// Fires only on a new per-session maximum of regions in a single frame.
/// Indices continue from everything written before, so a later, larger group
/// never overwrites earlier crops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HighWaterMark {
    highest_count_seen: usize,
    artifacts_written: usize,
}

impl HighWaterMark {
    /// Feed the region count of one frame. Returns the first crop index to
    /// write when the count is a new maximum and saving is enabled.
    pub fn observe(&mut self, count: usize, save: bool) -> Option<usize> {
        if count == 0 || count <= self.highest_count_seen {
            return None;
        }
        self.highest_count_seen = count;
        if !save {
            return None;
        }
        let start = self.artifacts_written;
        self.artifacts_written += count;
        Some(start)
    }

    pub fn highest_count_seen(&self) -> usize {
        self.highest_count_seen
    }

    pub fn artifacts_written(&self) -> usize {
        self.artifacts_written
    }
}

/// Result of running one detector on one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDetections {
    /// Regions in full resolution coordinates
    pub regions: Vec<Rect>,
    /// First crop index, when these regions should be saved
    pub write_from: Option<usize>,
}

/// A detector with a loaded cascade, owned by one session
pub struct ActiveDetector {
    name: String,
    params: DetectParams,
    style: DrawStyle,
    cascade: Option<Box<dyn Cascade>>,
    mark: HighWaterMark,
}

impl ActiveDetector {
    fn new(settings: &DetectorSettings, cascade: Box<dyn Cascade>) -> Self {
        Self {
            name: settings.name.clone(),
            params: settings.params,
            style: DrawStyle::from_settings(settings),
            cascade: Some(cascade),
            mark: HighWaterMark::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn style(&self) -> &DrawStyle {
        &self.style
    }

    pub fn mark(&self) -> HighWaterMark {
        self.mark
    }

    /// Run on the working buffer, which is the full frame downscaled by `scale`
    pub fn process(&mut self, working: &Frame, scale: u32, save: bool) -> FrameDetections {
        let Some(cascade) = self.cascade.as_mut() else {
            return FrameDetections::default();
        };

        // min/max windows are fractions of the frame being searched, so they
        // shrink with the working buffer and stay in its coordinate space
        let request = detect_request(&self.params, working.width(), working.height());
        let regions: Vec<Rect> = cascade
            .detect(working, &request)
            .into_iter()
            .map(|rect| rect.scaled(scale.max(1)))
            .collect();

        let previous_high = self.mark.highest_count_seen();
        let write_from = self.mark.observe(regions.len(), save);
        if regions.len() > previous_high {
            debug!(name = %self.name, count = %regions.len(), "detection_new_high");
        } else if !regions.is_empty() {
            trace!(name = %self.name, count = %regions.len(), "detection");
        }

        FrameDetections { regions, write_from }
    }

    /// Release the cascade handle. Safe to call more than once.
    pub fn release(&mut self) -> anyhow::Result<()> {
        match self.cascade.take() {
            Some(mut cascade) => cascade.release(),
            None => Ok(()),
        }
    }
}

/// Engine arguments for a frame of `width` x `height`
///
/// All-zero params leave window bounds to the engine. Otherwise the window
/// fractions are applied to the dimensions of the frame being searched.
pub fn detect_request(params: &DetectParams, width: u32, height: u32) -> DetectRequest {
    let window = if params.is_default() {
        None
    } else {
        let w = width as f64;
        let h = height as f64;
        Some((
            ((w * params.min_width_fraction) as u32, (h * params.min_height_fraction) as u32),
            ((w * params.max_width_fraction) as u32, (h * params.max_height_fraction) as u32),
        ))
    };

    DetectRequest {
        scale_factor: params.scale_factor,
        min_neighbors: params.min_neighbors,
        flags: params.flags,
        window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::{EYE, FACE};
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn settings(name: &str, params: DetectParams) -> DetectorSettings {
        DetectorSettings {
            name: name.to_string(),
            source_file: PathBuf::from(format!("/cascades/{name}.xml")),
            annotation: name.to_uppercase(),
            color: 0x00ff00,
            thickness: 2,
            render_as_circle: false,
            params,
        }
    }

    struct FixedCascade {
        regions: Vec<Rect>,
        requests: Arc<Mutex<Vec<DetectRequest>>>,
    }

    impl Cascade for FixedCascade {
        fn detect(&mut self, _frame: &Frame, request: &DetectRequest) -> Vec<Rect> {
            self.requests.lock().push(*request);
            self.regions.clone()
        }

        fn release(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Engine {
        missing: &'static str,
        requests: Arc<Mutex<Vec<DetectRequest>>>,
    }

    impl DetectionEngine for Engine {
        fn load(&self, source_file: &Path) -> anyhow::Result<Box<dyn Cascade>> {
            if source_file.ends_with(self.missing) {
                anyhow::bail!("no such file");
            }
            Ok(Box::new(FixedCascade {
                regions: vec![Rect::new(10, 20, 30, 40)],
                requests: self.requests.clone(),
            }))
        }
    }

    #[test]
    fn test_high_water_mark_sequence() {
        let mut mark = HighWaterMark::default();
        let writes: Vec<Option<usize>> =
            [1, 1, 3, 2, 3].into_iter().map(|count| mark.observe(count, true)).collect();

        assert_eq!(writes, vec![Some(0), None, Some(1), None, None]);
        assert_eq!(mark.highest_count_seen(), 3);
        assert_eq!(mark.artifacts_written(), 4);
    }

    #[test]
    fn test_high_water_mark_without_saving() {
        let mut mark = HighWaterMark::default();
        assert_eq!(mark.observe(2, false), None);
        assert_eq!(mark.highest_count_seen(), 2);
        assert_eq!(mark.artifacts_written(), 0);
        assert_eq!(mark.observe(0, true), None);
    }

    #[test]
    fn test_load_drops_failed_detectors() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine { missing: "profile_face.xml", requests };
        let set = DetectorSet::new(vec![
            settings("face", FACE.params),
            settings("profile_face", FACE.params),
            settings("eye", EYE.params),
        ]);

        let active = set.load(Some(&engine as &dyn DetectionEngine));
        let names: Vec<&str> = active.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["face", "eye"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_load_without_engine() {
        let set = DetectorSet::new(vec![settings("face", FACE.params)]);
        assert!(set.load(None).is_empty());
    }

    #[test]
    fn test_process_scales_regions_back() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine { missing: "-", requests: requests.clone() };
        let set = DetectorSet::new(vec![settings("face", FACE.params)]);
        let mut active = set.load(Some(&engine as &dyn DetectionEngine));

        let working = Frame::new(320, 240);
        let found = active[0].process(&working, 2, true);
        assert_eq!(found.regions, vec![Rect::new(20, 40, 60, 80)]);
        assert_eq!(found.write_from, Some(0));

        let again = active[0].process(&working, 2, true);
        assert_eq!(again.write_from, None);
        assert_eq!(active[0].mark().artifacts_written(), 1);

        let request = requests.lock()[0];
        assert_eq!(request.scale_factor, 1.4);
        assert_eq!(request.min_neighbors, 4);
        assert_eq!(request.window, Some(((16, 12), (256, 192))));
    }

    #[test]
    fn test_default_params_leave_window_to_engine() {
        let request = detect_request(&DetectParams::default(), 640, 480);
        assert_eq!(request.window, None);
        assert_eq!(request.scale_factor, 0.0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine { missing: "-", requests };
        let mut active = DetectorSet::new(vec![settings("face", FACE.params)]).load(Some(&engine as &dyn DetectionEngine));
        assert!(active[0].release().is_ok());
        assert!(active[0].release().is_ok());
        assert_eq!(active[0].process(&Frame::new(10, 10), 2, true), FrameDetections::default());
    }

    #[test]
    fn test_draw_style_from_settings() {
        let mut eye = settings("eye", EYE.params);
        eye.render_as_circle = true;
        eye.color = 0xff00ff;
        let style = DrawStyle::from_settings(&eye);
        assert!(style.render_as_circle);
        assert_eq!(style.color, Color::new(255, 0, 255));
        assert_eq!(style.annotation, "EYE");
    }
}
