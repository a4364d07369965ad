//! Модуль синхронизации синтезированной речи с субтитрами
//!
//! Подгонка отдельных клипов, сборка дорожки и выравнивание ее длины по видео.

pub mod finalize;
pub mod fit;
pub mod timeline;

pub use finalize::{finalize, FinalizedTrack, TrackAdjustment};
pub use fit::{plan_fit, render_fit, FitDecision, FitPlan, RenderOptions};
pub use timeline::{assemble, AssemblyConfig, FittedSegment, SegmentFit, Timeline, Track};
