use std::path::PathBuf;

/// An object recording observations about the execution of the code under test.
///
/// Recording is bracketed by [`start_recording`](Sensor::start_recording) and
/// [`stop_recording`](Sensor::stop_recording). The methods take `&self`
/// because sensors are shared with the instrumentation callbacks, which
/// cannot be handed a unique reference.
pub trait Sensor {
    /// Clears the observations of the previous run and starts a new one.
    fn start_recording(&self);
    /// Stops recording. The observations stay readable until the next
    /// call to `start_recording`.
    fn stop_recording(&self);
    /// Calls `handler` with `(index, count)` for every nonzero observation.
    fn iterate_over_observations(&self, handler: &mut dyn FnMut((usize, u64)));
}

/// A type that can produce files describing its state, to be written
/// inside a statistics folder.
pub trait SaveToStatsFolder {
    /// Returns a list of `(path relative to the stats folder, file content)`.
    fn save_to_stats_folder(&self) -> Vec<(PathBuf, Vec<u8>)>;
}
