use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("not supported by this cursor backend")]
    Unsupported,
}

/// Host cursor management. Every failure is non-fatal to the caller.
pub trait CursorControl: Send {
    fn lock_to_center(&mut self) -> Result<(), CursorError>;
    fn hide(&mut self) -> Result<(), CursorError>;
    fn show(&mut self) -> Result<(), CursorError>;
}

/// Cursor backend for evdev capture. While the mouse is grabbed the
/// compositor receives no motion, so the pointer already stays where it
/// is; visibility is owned by the compositor and cannot be changed here.
pub struct GrabbedCursor;

impl CursorControl for GrabbedCursor {
    fn lock_to_center(&mut self) -> Result<(), CursorError> {
        Ok(())
    }

    fn hide(&mut self) -> Result<(), CursorError> {
        Err(CursorError::Unsupported)
    }

    fn show(&mut self) -> Result<(), CursorError> {
        Err(CursorError::Unsupported)
    }
}
