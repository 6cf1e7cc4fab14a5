use model::{Color, Pixel15, Tile};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Limits for coalescing consecutive draw-dab messages into one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Most messages one batch may hold.
    pub max_messages: usize,
    /// Most covered pixel area one batch may hold.
    pub max_area: u64,
    /// A batch is only started by a message covering less than this.
    pub threshold_area: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        const MAX_AREA: u64 = 256 * 256 * 16;
        Self {
            max_messages: 1024,
            max_area: MAX_AREA,
            threshold_area: MAX_AREA / 2,
        }
    }
}

/// Colors of the matte shown behind transparent parts of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub color1: Color,
    pub color2: Color,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            color1: Color::from_argb(0xff, 0x80, 0x80, 0x80),
            color2: Color::WHITE,
        }
    }
}

impl CheckerConfig {
    pub(crate) fn tile(&self) -> Tile {
        Tile::checker(
            Pixel15::from_color(self.color1),
            Pixel15::from_color(self.color2),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Render worker count. `None` uses the available parallelism.
    pub render_thread_count: Option<usize>,
    pub batch: BatchConfig,
    pub undo_depth_limit: usize,
    pub checker: CheckerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_thread_count: None,
            batch: BatchConfig::default(),
            undo_depth_limit: history::DEFAULT_UNDO_DEPTH_LIMIT,
            checker: CheckerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.render_thread_count == Some(0) {
            return Err(EngineError::InvalidConfig(
                "render_thread_count must be at least 1".to_owned(),
            ));
        }
        if self.batch.max_messages == 0 {
            return Err(EngineError::InvalidConfig(
                "batch.max_messages must be at least 1".to_owned(),
            ));
        }
        if self.batch.max_area == 0 {
            return Err(EngineError::InvalidConfig(
                "batch.max_area must be at least 1".to_owned(),
            ));
        }
        if self.batch.threshold_area > self.batch.max_area {
            return Err(EngineError::InvalidConfig(format!(
                "batch.threshold_area {} exceeds batch.max_area {}",
                self.batch.threshold_area, self.batch.max_area
            )));
        }
        if self.undo_depth_limit == 0 {
            return Err(EngineError::InvalidConfig(
                "undo_depth_limit must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    pub(crate) fn resolved_render_thread_count(&self) -> usize {
        self.render_thread_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
