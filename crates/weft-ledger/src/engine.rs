//! Consensus engine.
//!
//! The propose/vote/commit state machine of one node. The engine is pure
//! state: the node layer drives it from timers and inbound frames, and
//! turns its verdicts into broadcasts.
//!
//! Round shape: the leader takes transactions from the mempool, builds and
//! signs a block, broadcasts the proposal, self-votes, and arms the vote
//! window. Followers validate and vote. When the window closes the leader
//! commits on quorum or drops the round; either way everyone returns to
//! `Idle`.

use crate::chain::{Blockchain, required_approvals};
use crate::schedule::Whitelist;
use std::collections::HashMap;
use weft_crypto::VerifyingKey;
use weft_proto::{Block, NodeId};

/// Per-node consensus state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusState {
    /// No round in progress
    Idle,
    /// This node proposed a block and is collecting votes
    Proposing,
    /// This node voted on a peer's proposal and awaits the outcome
    Voting,
}

/// What to do with a received proposal
#[derive(Debug, PartialEq)]
pub enum ProposalVerdict {
    /// Broadcast this vote
    Vote {
        /// Hash of the proposed block
        block_hash: String,
        /// Whether the block validated
        approve: bool,
    },
    /// Proposal did not come from the accepted leader; drop it
    IgnoredNotLeader,
    /// A round is already in progress; drop it
    IgnoredBusy,
}

/// Outcome of closing the vote window
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// Quorum reached; the caller commits this block
    Committed(Block),
    /// Quorum missed; the round is dropped
    Dropped {
        /// Approvals received
        approvals: usize,
        /// Approvals required
        required: usize,
    },
    /// Nothing to finalize (follower window expiry or no round)
    Cleared,
}

/// The propose/vote/commit state machine.
pub struct ConsensusEngine {
    local_id: NodeId,
    state: ConsensusState,
    pending_block: Option<Block>,
    votes: HashMap<String, HashMap<NodeId, bool>>,
    min_votes: usize,
    current_leader: Option<NodeId>,
}

impl ConsensusEngine {
    /// Create an idle engine
    #[must_use]
    pub fn new(local_id: NodeId, min_votes: usize) -> Self {
        Self {
            local_id,
            state: ConsensusState::Idle,
            pending_block: None,
            votes: HashMap::new(),
            min_votes,
            current_leader: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConsensusState {
        self.state
    }

    /// The accepted leader, if any
    #[must_use]
    pub fn current_leader(&self) -> Option<&NodeId> {
        self.current_leader.as_ref()
    }

    /// Whether this node is the accepted leader
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.current_leader.as_ref() == Some(&self.local_id)
    }

    /// The block pending in the current round
    #[must_use]
    pub fn pending_block(&self) -> Option<&Block> {
        self.pending_block.as_ref()
    }

    /// Install a newly computed leader; returns `true` when it changed.
    pub fn set_leader(&mut self, leader: Option<NodeId>) -> bool {
        if self.current_leader == leader {
            return false;
        }
        tracing::debug!(leader = ?leader, "leader changed");
        self.current_leader = leader;
        true
    }

    /// Handle a leadership claim from a peer.
    ///
    /// A claim from a whitelisted node whose chain height is at least ours
    /// is accepted; this resynchronizes drifted clocks. Returns `true` when
    /// the leader changed.
    pub fn on_leader_announcement(
        &mut self,
        leader: &NodeId,
        claimed_height: u64,
        local_height: u64,
        whitelist: &Whitelist,
    ) -> bool {
        if !whitelist.contains(leader) {
            tracing::warn!(claimant = %leader, "leader claim from non-whitelisted node");
            return false;
        }
        if claimed_height < local_height {
            tracing::debug!(
                claimant = %leader,
                claimed_height,
                local_height,
                "stale leader claim ignored"
            );
            return false;
        }
        self.set_leader(Some(leader.clone()))
    }

    /// Open a proposing round with a block this node built.
    ///
    /// Records the self-vote. Returns `false` if a round is already in
    /// progress (the production tick skips).
    pub fn begin_round(&mut self, block: Block) -> bool {
        if self.state != ConsensusState::Idle {
            return false;
        }
        let hash = block.hash.clone();
        self.votes.clear();
        self.votes
            .entry(hash)
            .or_default()
            .insert(self.local_id.clone(), true);
        self.pending_block = Some(block);
        self.state = ConsensusState::Proposing;
        true
    }

    /// Handle a proposal from a peer: verify provenance, validate the
    /// block, move to `Voting`, and say how to vote.
    pub fn on_proposal(
        &mut self,
        block: Block,
        from: &NodeId,
        chain: &Blockchain,
        key_of: impl Fn(&NodeId) -> Option<VerifyingKey> + Copy,
    ) -> ProposalVerdict {
        if self.current_leader.as_ref() != Some(from) {
            tracing::warn!(
                proposer = %from,
                leader = ?self.current_leader,
                "proposal from non-leader dropped"
            );
            return ProposalVerdict::IgnoredNotLeader;
        }
        if self.state != ConsensusState::Idle {
            tracing::debug!(proposer = %from, "proposal while round in progress");
            return ProposalVerdict::IgnoredBusy;
        }

        let approve = match chain.validate_next(&block, key_of) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(proposer = %from, "rejecting proposal: {e}");
                false
            }
        };
        let block_hash = block.hash.clone();
        self.votes
            .entry(block_hash.clone())
            .or_default()
            .insert(self.local_id.clone(), approve);
        self.pending_block = Some(block);
        self.state = ConsensusState::Voting;
        ProposalVerdict::Vote { block_hash, approve }
    }

    /// Record a vote from a whitelisted peer. Votes from outside the
    /// whitelist are dropped.
    pub fn record_vote(
        &mut self,
        block_hash: &str,
        voter: &NodeId,
        approve: bool,
        whitelist: &Whitelist,
    ) {
        if !whitelist.contains(voter) {
            tracing::warn!(voter = %voter, "vote from non-whitelisted node dropped");
            return;
        }
        self.votes
            .entry(block_hash.to_string())
            .or_default()
            .insert(voter.clone(), approve);
    }

    /// Approvals and rejections recorded for a block hash
    #[must_use]
    pub fn tally(&self, block_hash: &str) -> (usize, usize) {
        match self.votes.get(block_hash) {
            Some(votes) => {
                let approvals = votes.values().filter(|v| **v).count();
                (approvals, votes.len() - approvals)
            }
            None => (0, 0),
        }
    }

    /// Close the vote window.
    ///
    /// If this node authored the pending block and it gathered quorum, the
    /// block is handed back for commit. In every case the round state is
    /// cleared and the engine returns to `Idle`.
    pub fn finalize(&mut self, whitelist: &Whitelist) -> FinalizeOutcome {
        self.state = ConsensusState::Idle;
        let Some(block) = self.pending_block.take() else {
            self.votes.clear();
            return FinalizeOutcome::Cleared;
        };
        let (approvals, rejections) = self.tally(&block.hash);
        self.votes.clear();

        if block.author != self.local_id {
            return FinalizeOutcome::Cleared;
        }
        let required = required_approvals(whitelist.len(), self.min_votes);
        if approvals >= required {
            FinalizeOutcome::Committed(block)
        } else {
            tracing::warn!(approvals, rejections, required, "proposal missed quorum");
            FinalizeOutcome::Dropped { approvals, required }
        }
    }

    /// A block with this hash was committed (via `new-block` or sync); if
    /// it resolves the pending round, return to `Idle`.
    pub fn observe_commit(&mut self, block_hash: &str) {
        if self
            .pending_block
            .as_ref()
            .is_some_and(|b| b.hash == block_hash)
        {
            self.pending_block = None;
            self.votes.clear();
            self.state = ConsensusState::Idle;
        }
    }

    /// Drop any round state (shutdown)
    pub fn reset(&mut self) {
        self.state = ConsensusState::Idle;
        self.pending_block = None;
        self.votes.clear();
    }
}
