/// Index of a [`FileState`] within a [`crate::WritableRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub(crate) u32);

/// Per-open-resource state shared by every writable rooted in it.
///
/// The frontend tree outlives the backend resource: closing a file leaves
/// the writables in place but flips `valid`, so that any late task against
/// the closed resource is caught before reaching the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    /// File name as the driver sees it (no directory, suffix included).
    pub name: String,
    pub valid: bool,
}

impl FileState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            valid: true,
        }
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}
