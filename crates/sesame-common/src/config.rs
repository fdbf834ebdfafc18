//! Solver configuration.
//!
//! Discovery tiers, verification signals and tuning constants are plain
//! data here so they can be extended from a config file without touching
//! control flow. Everything has a safe default; a missing config file is
//! not an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// What a discovery tier is scanning for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// A known challenge-iframe embedding pattern, confirmed loaded.
    ChallengeFrame,
    /// Container marker elements inside the page or a child frame.
    ContainerMarker,
    /// Any canvas-bearing widget.
    Canvas,
    /// Slider/track controls, the last resort.
    SliderControl,
}

/// One prioritized discovery strategy of the frame locator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryTier {
    pub name: String,
    pub kind: TierKind,
    pub selectors: Vec<String>,
}

/// One independent success signal checked during verification. Any single
/// hit within the window counts as solved; the order here is a heuristic
/// priority, not a contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum VerifySignal {
    /// An explicit success marker element became visible.
    Marker { selector: String },
    /// A known success phrase appeared in the widget text.
    Phrase { text: String },
    /// A post-challenge "continue" affordance appeared.
    ContinueControl { selector: String },
    /// The challenge frame itself went hidden or detached.
    FrameGone,
    /// An authentication cookie showed up on the session.
    Cookie { name: String },
}

/// Column-scan tuning for the pixel-diff gap strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelDiffConfig {
    /// Fraction of the width excluded on each side of the scan.
    pub side_margin_ratio: f32,
    /// Fraction of the height excluded on top and bottom of the scan.
    pub vertical_margin_ratio: f32,
    /// Minimum summed |dR|+|dG|+|dB| for a row to count as changed.
    pub diff_threshold: u32,
    /// Minimum fraction of scanned rows a column must activate.
    pub activation_floor_ratio: f32,
}

impl Default for PixelDiffConfig {
    fn default() -> Self {
        PixelDiffConfig {
            side_margin_ratio: 0.15,
            vertical_margin_ratio: 0.2,
            diff_threshold: 150,
            activation_floor_ratio: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Path to the pretrained ONNX detection model. Absent means the
    /// detection path is skipped and only pixel-diff is available.
    pub model_path: Option<PathBuf>,
    /// Side of the model's fixed square input.
    pub model_input_size: u32,
    pub min_confidence: f32,
    pub nms_iou: f32,
    pub max_attempts: u32,
    /// Empirical forward correction added to the DOM delta; drags tend to
    /// stop short of the true target.
    pub forward_bias_px: f64,
    /// Assumed piece width when no piece detection is available.
    pub default_piece_width_px: f32,
    pub locate_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub verify_window_ms: u64,
    pub verify_poll_ms: u64,
    pub refresh_settle_ms: u64,
    pub pixel_diff: PixelDiffConfig,
    pub debug: bool,
    pub debug_dir: PathBuf,
    pub tiers: Vec<DiscoveryTier>,
    /// Aligned full / background-with-gap canvases, tried in order.
    pub canvas_full_selectors: Vec<String>,
    pub canvas_gap_selectors: Vec<String>,
    /// Single-image widget containers, tried when no canvas pair exists.
    pub container_selectors: Vec<String>,
    pub slider_handle_selectors: Vec<String>,
    pub slider_track_selectors: Vec<String>,
    pub refresh_selectors: Vec<String>,
    pub verify_signals: Vec<VerifySignal>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            model_path: None,
            model_input_size: 320,
            min_confidence: 0.4,
            nms_iou: 0.45,
            max_attempts: 3,
            forward_bias_px: 2.0,
            default_piece_width_px: 60.0,
            locate_timeout_ms: 8_000,
            poll_interval_ms: 250,
            verify_window_ms: 2_500,
            verify_poll_ms: 250,
            refresh_settle_ms: 1_200,
            pixel_diff: PixelDiffConfig::default(),
            debug: false,
            debug_dir: PathBuf::from("./sesame-debug"),
            tiers: default_tiers(),
            canvas_full_selectors: vec![
                ".geetest_canvas_fullbg canvas".into(),
                "canvas.captcha-full".into(),
            ],
            canvas_gap_selectors: vec![
                ".geetest_canvas_bg canvas".into(),
                "canvas.captcha-bg".into(),
            ],
            container_selectors: vec![
                ".geetest_widget".into(),
                ".captcha-widget".into(),
                "[class*='captcha'][class*='container']".into(),
            ],
            slider_handle_selectors: vec![
                ".geetest_slider_button".into(),
                "[class*='slider'][class*='button']".into(),
                "[class*='slider'][class*='handle']".into(),
            ],
            slider_track_selectors: vec![
                ".geetest_slider_track".into(),
                "[class*='slider'][class*='track']".into(),
            ],
            refresh_selectors: vec![
                ".geetest_refresh_1".into(),
                "[class*='captcha'][class*='refresh']".into(),
                "[class*='reload']".into(),
            ],
            verify_signals: default_verify_signals(),
        }
    }
}

fn default_tiers() -> Vec<DiscoveryTier> {
    vec![
        DiscoveryTier {
            name: "challenge-iframe".into(),
            kind: TierKind::ChallengeFrame,
            selectors: vec![
                "iframe[src*='captcha']".into(),
                "iframe[src*='geetest']".into(),
                "iframe[title*='challenge']".into(),
            ],
        },
        DiscoveryTier {
            name: "container-marker".into(),
            kind: TierKind::ContainerMarker,
            selectors: vec![
                ".geetest_widget".into(),
                ".geetest_panel".into(),
                "[class*='captcha'][class*='container']".into(),
            ],
        },
        DiscoveryTier {
            name: "canvas".into(),
            kind: TierKind::Canvas,
            selectors: vec![
                ".geetest_canvas_bg canvas".into(),
                "canvas[class*='captcha']".into(),
            ],
        },
        DiscoveryTier {
            name: "slider-control".into(),
            kind: TierKind::SliderControl,
            selectors: vec![
                ".geetest_slider_button".into(),
                "[class*='slider'][class*='track']".into(),
            ],
        },
    ]
}

fn default_verify_signals() -> Vec<VerifySignal> {
    vec![
        VerifySignal::Marker {
            selector: ".geetest_success_radar_tip".into(),
        },
        VerifySignal::Phrase {
            text: "verification success".into(),
        },
        VerifySignal::ContinueControl {
            selector: "[class*='captcha'] [class*='continue']".into(),
        },
        VerifySignal::FrameGone,
        VerifySignal::Cookie {
            name: "acw_sc__v3".into(),
        },
    ]
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./sesame.yaml
    /// 2. ~/.sesame/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<SolverConfig, ConfigError> {
        let local_config = PathBuf::from("./sesame.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".sesame").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(SolverConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<SolverConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: SolverConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SolverConfig::default();
        assert!(cfg.min_confidence > 0.0 && cfg.min_confidence < 1.0);
        assert!(cfg.nms_iou > 0.0 && cfg.nms_iou < 1.0);
        assert!(cfg.max_attempts >= 1);
        assert_eq!(cfg.tiers.len(), 4);
        assert!(!cfg.verify_signals.is_empty());
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let cfg: SolverConfig = serde_yaml::from_str("max_attempts: 5\ndebug: true").unwrap();
        assert_eq!(cfg.max_attempts, 5);
        assert!(cfg.debug);
        assert_eq!(cfg.model_input_size, SolverConfig::default().model_input_size);
    }

    #[tokio::test]
    async fn load_from_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesame.yaml");
        tokio::fs::write(&path, "min_confidence: 0.25\n")
            .await
            .unwrap();
        let cfg = ConfigLoader::load_from(&path).await.unwrap();
        assert!((cfg.min_confidence - 0.25).abs() < 1e-6);
    }
}
