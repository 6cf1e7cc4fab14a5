use protocol::LayerId;

/// Reasons a message could not be applied to a canvas state. The state the
/// message was applied to is left untouched in every case.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("layer {0} not found")]
    LayerNotFound(LayerId),
    #[error("layer {0} already exists")]
    LayerExists(LayerId),
    #[error("layer {0} is a group")]
    LayerIsGroup(LayerId),
    #[error("layer {0} is not a group")]
    NotAGroup(LayerId),
    #[error("invalid layer id {0}")]
    InvalidLayerId(LayerId),
    #[error("layer order does not match the current layers")]
    InvalidLayerOrder,
    #[error("invalid canvas size {width}x{height}")]
    InvalidSize { width: i64, height: i64 },
    #[error("annotation {0} not found")]
    AnnotationNotFound(u16),
    #[error("annotation {0} already exists")]
    AnnotationExists(u16),
    #[error("timeline frame {frame} out of range, timeline has {len} frames")]
    FrameOutOfRange { frame: u16, len: usize },
}
