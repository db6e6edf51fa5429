//! Catalog records (material types, references, colors, designs) have identity
//! but no version: they are replaced wholesale, never mutated under contention.

pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Display;

    fn id(&self) -> &Self::Id;

    /// `"<kind> <id>"`, for log lines and error messages.
    fn describe(&self, kind: &str) -> String {
        format!("{kind} {}", self.id())
    }
}
