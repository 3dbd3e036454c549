//! Two-sided readiness gate between the UI and the protocol backend.

/// Which sides have declared themselves ready since the last hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    #[default]
    Neither,
    Ui,
    Protocol,
    Both,
}

impl Readiness {
    pub fn mark_ui(self) -> Self {
        match self {
            Self::Neither | Self::Ui => Self::Ui,
            Self::Protocol | Self::Both => Self::Both,
        }
    }

    pub fn mark_protocol(self) -> Self {
        match self {
            Self::Neither | Self::Protocol => Self::Protocol,
            Self::Ui | Self::Both => Self::Both,
        }
    }

    pub fn has_ui(self) -> bool {
        matches!(self, Self::Ui | Self::Both)
    }

    pub fn has_protocol(self) -> bool {
        matches!(self, Self::Protocol | Self::Both)
    }
}

/// Gate the pump waits on.
///
/// When the UI does not moderate I/O (plain file on the local side) it is
/// always ready and the gate opens on protocol readiness alone. The gate
/// resets to [`Readiness::Neither`] every time it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    state: Readiness,
    ui_always_ready: bool,
}

impl ReadinessGate {
    pub fn new(ui_always_ready: bool) -> Self {
        Self {
            state: Readiness::Neither,
            ui_always_ready,
        }
    }

    pub fn state(&self) -> Readiness {
        self.state
    }

    pub fn ui_always_ready(&self) -> bool {
        self.ui_always_ready
    }

    pub fn is_ready_to_pump(&self) -> bool {
        self.state.has_protocol() && (self.ui_always_ready || self.state.has_ui())
    }

    /// Records UI readiness. Returns `true` (and resets) if the pump may run.
    pub fn mark_ui_ready(&mut self) -> bool {
        self.state = self.state.mark_ui();
        self.take_ready()
    }

    /// Records protocol readiness. Returns `true` (and resets) if the pump
    /// may run.
    pub fn mark_protocol_ready(&mut self) -> bool {
        self.state = self.state.mark_protocol();
        self.take_ready()
    }

    /// Records protocol readiness without opening the gate.
    pub fn note_protocol_ready(&mut self) {
        self.state = self.state.mark_protocol();
    }

    /// Consumes a pending hand-off.
    pub fn take_ready(&mut self) -> bool {
        if self.is_ready_to_pump() {
            self.state = Readiness::Neither;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.state = Readiness::Neither;
    }
}
