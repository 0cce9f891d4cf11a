use crate::protocol::{FeatureId, FEATURE_SLOTS};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureState {
    pub on: bool,
    /// Set by an outbound command and not yet confirmed by a status broadcast.
    pub pending: bool,
}

/// Last known on/off state of every feature slot.
///
/// Status broadcasts only carry the circuits of equip1/equip2, the other features keep
/// whatever the last command set. The registry is eventually consistent with the panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureRegistry {
    states: [FeatureState; FEATURE_SLOTS],
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, feature: FeatureId) -> FeatureState {
        self.states[feature.slot()]
    }

    pub fn is_on(&self, feature: FeatureId) -> bool {
        self.get(feature).on
    }

    pub fn is_pending(&self, feature: FeatureId) -> bool {
        self.get(feature).pending
    }

    /// Records a commanded state before the panel confirms it.
    pub fn set_optimistic(&mut self, feature: FeatureId, on: bool) {
        self.states[feature.slot()] = FeatureState { on, pending: true };
    }

    /// Records the state reported by the panel and returns whether the value changed.
    pub fn confirm(&mut self, feature: FeatureId, on: bool) -> bool {
        let slot = &mut self.states[feature.slot()];
        let changed = slot.on != on;
        *slot = FeatureState { on, pending: false };
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, FeatureState)> + '_ {
        FeatureId::ALL
            .into_iter()
            .filter(|feature| *feature != FeatureId::Unknown)
            .map(|feature| (feature, self.get(feature)))
    }
}
