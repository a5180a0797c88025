/// Direction of an ADVANCE task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    Begin,
    End,
}

/// What the driver reported back from an ADVANCE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceStatus {
    /// The step was opened/closed as requested.
    Ok,
    /// The stream has ended; no further steps will arrive.
    Over,
    /// The driver does not implement steps; the full dataset is already
    /// visible and stays so.
    RandomAccess,
}

/// Frontend-visible step activity, per file in file-based encoding and per
/// series otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Steps are not used on this resource.
    NoStep,
    DuringStep,
    OutOfStep,
    StreamOver,
}

/// Driver-internal stream state for step-capable engines.
///
/// ```text
/// Undecided ──first op──▶ { NoStream │ OutsideOfStep │ Parsing }
/// OutsideOfStep ──BEGIN──▶ DuringStep ──END──▶ OutsideOfStep
///        │                     │
///        └──(engine EOF)───────┴─────▶ StreamOver
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// No operation has touched the stream yet; the first one decides.
    Undecided,
    /// A random-access resource; BEGIN/END are no-ops.
    NoStream,
    DuringStep,
    OutsideOfStep,
    StreamOver,
    /// The engine is re-reading metadata between steps.
    Parsing,
}
