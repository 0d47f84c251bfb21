//! Job priority. Smaller numeric values are more urgent; sort order for
//! fetch is ascending priority, then ascending `created_at`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Declaration order matches ascending raw value order (Critical=-15 is the
/// smallest / most urgent, Low=10 is the largest / least urgent) so the
/// derived `Ord` agrees with the numeric ordering the persisted schema uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Normal,
    Low,
}

impl Priority {
    pub const fn as_raw(self) -> i32 {
        match self {
            Priority::Critical => -15,
            Priority::High => -10,
            Priority::Medium => -5,
            Priority::Normal => 0,
            Priority::Low => 10,
        }
    }

    /// Coerce a value loaded from storage into a known priority. Unknown
    /// values are coerced to `Normal` and a warning is emitted; this never
    /// fails the load.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            -15 => Priority::Critical,
            -10 => Priority::High,
            -5 => Priority::Medium,
            0 => Priority::Normal,
            10 => Priority::Low,
            other => {
                tracing::warn!(raw = other, "unknown priority value loaded from storage, coercing to Normal");
                Priority::Normal
            }
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_raw())
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i32::deserialize(deserializer)?;
        Ok(Priority::from_raw(raw))
    }
}
