//! Stage state machine
//!
//! The topology is a fixed sequence, so the machine is a transition table
//! rather than a graph executor. Every state is terminal on failure.

use tgdigest_core::{DeliveryStatus, PipelineState, StageName};

/// Stage that runs out of each non-terminal state, and the state it leads to.
pub const TRANSITIONS: [(PipelineState, StageName, PipelineState); 6] = [
    (PipelineState::ContextBuilt, StageName::Segmentation, PipelineState::Segmented),
    (PipelineState::Segmented, StageName::Emotion, PipelineState::EmotionScored),
    (PipelineState::EmotionScored, StageName::Roles, PipelineState::RolesAttributed),
    (PipelineState::RolesAttributed, StageName::Topics, PipelineState::TopicsExtracted),
    (PipelineState::TopicsExtracted, StageName::Synthesis, PipelineState::Synthesized),
    (PipelineState::Synthesized, StageName::Evaluation, PipelineState::Evaluated),
];

/// State reached when `stage` completes.
pub fn state_after(stage: StageName) -> PipelineState {
    TRANSITIONS
        .iter()
        .find(|(_, s, _)| *s == stage)
        .map(|(_, _, to)| *to)
        .unwrap_or(PipelineState::BlockedFailure)
}

/// Terminal state for a delivery decision.
pub fn terminal_state(status: DeliveryStatus) -> PipelineState {
    match status {
        DeliveryStatus::Pending => PipelineState::Delivered,
        DeliveryStatus::BlockedRbac => PipelineState::BlockedRbac,
        DeliveryStatus::BlockedQuality => PipelineState::BlockedQuality,
        DeliveryStatus::BlockedFailure => PipelineState::BlockedFailure,
    }
}

/// Position of one run in the stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMachine {
    state: PipelineState,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::ContextBuilt,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Stage to run next, `None` once evaluation completed or the run ended.
    pub fn next_stage(&self) -> Option<StageName> {
        TRANSITIONS
            .iter()
            .find(|(from, _, _)| *from == self.state)
            .map(|(_, stage, _)| *stage)
    }

    /// Mark `stage` complete. Ignored unless it is the expected next stage.
    pub fn complete(&mut self, stage: StageName) -> PipelineState {
        if self.next_stage() == Some(stage) {
            self.state = state_after(stage);
        } else {
            tracing::warn!(stage = %stage, state = ?self.state, "out-of-order stage completion ignored");
        }
        self.state
    }

    /// Move to the terminal state matching a delivery decision.
    pub fn finish(&mut self, status: DeliveryStatus) -> PipelineState {
        self.state = terminal_state(status);
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_walks_stages_in_order() {
        let mut machine = StageMachine::new();
        let mut seen = Vec::new();
        while let Some(stage) = machine.next_stage() {
            seen.push(stage);
            machine.complete(stage);
        }
        assert_eq!(seen, StageName::ALL.to_vec());
        assert_eq!(machine.state(), PipelineState::Evaluated);
    }

    #[test]
    fn test_out_of_order_completion_is_ignored() {
        let mut machine = StageMachine::new();
        assert_eq!(machine.complete(StageName::Topics), PipelineState::ContextBuilt);
        assert_eq!(machine.next_stage(), Some(StageName::Segmentation));
    }

    #[test]
    fn test_finish_maps_delivery_status() {
        let mut machine = StageMachine::new();
        assert_eq!(machine.finish(DeliveryStatus::BlockedRbac), PipelineState::BlockedRbac);
        assert!(machine.state().is_terminal());
        assert_eq!(machine.next_stage(), None);
        assert_eq!(terminal_state(DeliveryStatus::Pending), PipelineState::Delivered);
    }
}
