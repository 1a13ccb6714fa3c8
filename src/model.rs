//! Product key → on/off data-point index lookup.
//!
//! A device whose product key has no entry here keeps `control_point == 0`,
//! which disables sense/control for it until the operator adds the mapping
//! (see `DeviceTable::resolve_control_points`).

/// `(productKey, friendlyName, controlPointIndex)`.
#[derive(Debug, Clone)]
pub struct Model {
    pub product_key: String,
    pub friendly_name: String,
    pub control_point: u32,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: Vec<Model>,
    dirty: bool,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive linear lookup by product key.
    pub fn lookup(&self, product_key: &str) -> Option<&Model> {
        self.models
            .iter()
            .find(|m| m.product_key.eq_ignore_ascii_case(product_key))
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Replace the registry's contents. Only flips the dirty flag when the
    /// new list actually differs from what's loaded.
    pub fn reload(&mut self, models: Vec<Model>) {
        let changed = models.len() != self.models.len()
            || models.iter().zip(self.models.iter()).any(|(a, b)| {
                !a.product_key.eq_ignore_ascii_case(&b.product_key)
                    || a.friendly_name != b.friendly_name
                    || a.control_point != b.control_point
            });
        self.models = models;
        if changed {
            self.dirty = true;
        }
    }
}
