/// Visual annotation attached to a tree node. Immutable value type; state
/// changes replace the whole decoration instead of patching fields in
/// place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoration {
    pub badge: Option<String>,
    pub tooltip: Option<String>,
    pub dimmed: bool,
}

impl Decoration {
    pub fn none() -> Self {
        Self::default()
    }

    /// Shown while a pull or push is in flight.
    pub fn in_progress(label: &str) -> Self {
        Self {
            badge: Some("\u{21c5}".to_string()),
            tooltip: Some(label.to_string()),
            dimmed: false,
        }
    }

    /// Dimmed marker for nodes without a local mirror.
    pub fn not_in_sync() -> Self {
        Self {
            badge: None,
            tooltip: Some("Not in sync".to_string()),
            dimmed: true,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::default()
    }

    /// Combine two decorations. Field precedence: the overlay wins on
    /// `badge` and `tooltip` when set; `dimmed` holds if either side dims.
    pub fn merge(base: &Decoration, overlay: &Decoration) -> Decoration {
        Decoration {
            badge: overlay.badge.clone().or_else(|| base.badge.clone()),
            tooltip: overlay.tooltip.clone().or_else(|| base.tooltip.clone()),
            dimmed: base.dimmed || overlay.dimmed,
        }
    }

    /// The same decoration with the dim bit cleared, other fields kept.
    pub fn undimmed(&self) -> Decoration {
        Decoration {
            dimmed: false,
            ..self.clone()
        }
    }
}
