//! Pipeline stages for dart recognition.
//!
//! Frames flow grabber -> [`MetaDataWriter`] -> [`BackgroundSubtraction`] ->
//! [`CleanDifference`] -> [`EdgeDetection`] -> [`FitLine`] ->
//! [`ProjectOnBoard`]; [`StateMachine`] is an alternative control path
//! driving background resets from contour arrivals.

mod background_subtraction;
mod clean_difference;
mod edge_detection;
mod fit_line;
mod metadata_writer;
mod project_on_board;
mod state_machine;

pub use background_subtraction::BackgroundSubtraction;
pub use clean_difference::CleanDifference;
pub use edge_detection::EdgeDetection;
pub use fit_line::FitLine;
pub use metadata_writer::MetaDataWriter;
pub use project_on_board::ProjectOnBoard;
pub use state_machine::StateMachine;


#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("frame for camera {0} carries no suggested ROI")]
    MissingRoi(dart_types::CamId),
    #[error("frame for camera {0} carries no {1} annotation")]
    MissingAnnotation(dart_types::CamId, &'static str),
    #[error("board projection supports exactly two cameras, got {0}")]
    TooManyCameras(usize),
    #[error("background model: {0}")]
    Background(#[from] mog2::Error),
    #[error("bundle: {0}")]
    Bundle(#[from] dart_types::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
