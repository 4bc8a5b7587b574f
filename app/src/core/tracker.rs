/// Remembers what the actuator was last successfully told, and whether the latest
/// attempt to tell it something failed.
#[derive(Debug, Clone)]
pub struct ChangeTracker<V> {
    last_sent: Option<V>,
    send_failed: bool,
}

impl<V> Default for ChangeTracker<V> {
    fn default() -> Self {
        Self {
            last_sent: None,
            send_failed: false,
        }
    }
}

impl<V: PartialEq + Clone> ChangeTracker<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A send is due when the decision changed or the previous send failed.
    pub fn needs_send(&self, desired: &V) -> bool {
        self.send_failed || self.last_sent.as_ref() != Some(desired)
    }

    pub fn sent(&mut self, value: V) {
        self.last_sent = Some(value);
        self.send_failed = false;
    }

    pub fn failed(&mut self) {
        self.send_failed = true;
    }

    pub fn last_sent(&self) -> Option<&V> {
        self.last_sent.as_ref()
    }

    pub fn has_pending_error(&self) -> bool {
        self.send_failed
    }
}
