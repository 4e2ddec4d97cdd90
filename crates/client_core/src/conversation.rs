use shared::domain::{DeliveryState, Message, UserId};
use tracing::{debug, info, warn};

use crate::config::TimelineOrdering;

/// Captures which peer selection a history fetch was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    generation: u64,
    peer_id: UserId,
}

impl HistoryTicket {
    pub fn peer_id(&self) -> &UserId {
        &self.peer_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A local echo was replaced by its server-confirmed copy.
    Confirmed,
    /// Repeated delivery of an already confirmed message.
    Duplicate,
    /// Message does not belong to the active conversation.
    Rejected,
}

impl AppendOutcome {
    pub fn changed_timeline(self) -> bool {
        matches!(self, Self::Appended | Self::Confirmed)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    message: Message,
}

/// Timeline of the active one-to-one conversation. The only writer of the
/// timeline; replaced wholesale whenever the active peer changes.
#[derive(Debug)]
pub struct ConversationStore {
    self_id: UserId,
    ordering: TimelineOrdering,
    active_peer: Option<UserId>,
    generation: u64,
    history_applied: bool,
    next_seq: u64,
    entries: Vec<Entry>,
}

impl ConversationStore {
    pub fn new(self_id: UserId, ordering: TimelineOrdering) -> Self {
        Self {
            self_id,
            ordering,
            active_peer: None,
            generation: 0,
            history_applied: false,
            next_seq: 0,
            entries: Vec::new(),
        }
    }

    pub fn self_id(&self) -> &UserId {
        &self.self_id
    }

    pub fn active_peer(&self) -> Option<&UserId> {
        self.active_peer.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Empties the timeline and returns the ticket the history backfill
    /// must present to be applied.
    pub fn select_peer(&mut self, peer_id: UserId) -> HistoryTicket {
        self.generation += 1;
        self.entries.clear();
        self.history_applied = false;
        info!(peer_id = %peer_id, generation = self.generation, "conversation: peer selected");
        self.active_peer = Some(peer_id.clone());
        HistoryTicket {
            generation: self.generation,
            peer_id,
        }
    }

    pub fn is_current(&self, ticket: &HistoryTicket) -> bool {
        ticket.generation == self.generation
            && self.active_peer.as_ref() == Some(&ticket.peer_id)
    }

    /// Replaces the timeline with fetched history. Messages appended since the
    /// peer was selected are kept unless history already carries them.
    /// Returns `false` for a stale or already applied ticket.
    pub fn apply_history(&mut self, ticket: &HistoryTicket, history: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            debug!(
                peer_id = %ticket.peer_id,
                ticket_generation = ticket.generation,
                generation = self.generation,
                "conversation: discarding stale history"
            );
            return false;
        }
        if self.history_applied {
            debug!(peer_id = %ticket.peer_id, "conversation: history already applied");
            return false;
        }
        self.history_applied = true;

        let appended_since = std::mem::take(&mut self.entries);
        let total = history.len();
        let mut history: Vec<Message> = history
            .into_iter()
            .filter(|message| self.belongs_to_active_pair(message) && message.is_well_formed())
            .collect();
        if history.len() != total {
            warn!(
                peer_id = %ticket.peer_id,
                dropped = total - history.len(),
                "conversation: history contained foreign or malformed records"
            );
        }
        if self.ordering == TimelineOrdering::Timestamp {
            history.sort_by_key(|message| message.timestamp);
        }
        for message in history {
            let seq = self.bump_seq();
            self.entries.push(Entry { seq, message });
        }

        for entry in appended_since {
            let known = self.position_of(&entry.message).is_some();
            if !known {
                self.insert(entry);
            }
        }
        info!(peer_id = %ticket.peer_id, len = self.entries.len(), "conversation: history applied");
        true
    }

    /// Optimistic echo of an outbound message.
    pub fn append_local(&mut self, message: Message) -> AppendOutcome {
        if !self.belongs_to_active_pair(&message) || message.sender_id != self.self_id {
            warn!(receiver_id = %message.receiver_id, "conversation: local echo outside the active conversation");
            return AppendOutcome::Rejected;
        }
        let seq = self.bump_seq();
        self.insert(Entry { seq, message });
        AppendOutcome::Appended
    }

    pub fn append_remote(&mut self, message: Message) -> AppendOutcome {
        if !self.belongs_to_active_pair(&message) {
            debug!(sender_id = %message.sender_id, "conversation: remote message outside the active conversation");
            return AppendOutcome::Rejected;
        }

        if let Some(index) = self.position_of(&message) {
            let entry = &self.entries[index];
            if entry.message.delivery_state == DeliveryState::Confirmed {
                debug!(client_message_id = ?message.client_message_id, "conversation: duplicate delivery dropped");
                return AppendOutcome::Duplicate;
            }
            debug!(client_message_id = ?message.client_message_id, "conversation: local echo confirmed");
            let seq = entry.seq;
            match self.ordering {
                TimelineOrdering::Arrival => self.entries[index].message = message,
                TimelineOrdering::Timestamp => {
                    self.entries.remove(index);
                    self.insert(Entry { seq, message });
                }
            }
            return AppendOutcome::Confirmed;
        }

        let seq = self.bump_seq();
        self.insert(Entry { seq, message });
        AppendOutcome::Appended
    }

    pub fn current_messages(&self) -> Vec<Message> {
        self.entries.iter().map(|entry| entry.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when the message is exchanged between self and the active peer.
    pub fn belongs_to_active_pair(&self, message: &Message) -> bool {
        let Some(peer) = &self.active_peer else {
            return false;
        };
        (message.sender_id == self.self_id && &message.receiver_id == peer)
            || (&message.sender_id == peer && message.receiver_id == self.self_id)
    }

    /// Index of the entry carrying the same idempotency key on the same
    /// route. A key reused on the opposite route is a different message.
    fn position_of(&self, message: &Message) -> Option<usize> {
        let id = message.client_message_id.as_ref()?;
        self.entries.iter().position(|entry| {
            entry.message.client_message_id.as_ref() == Some(id)
                && entry.message.sender_id == message.sender_id
                && entry.message.receiver_id == message.receiver_id
        })
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert(&mut self, entry: Entry) {
        match self.ordering {
            TimelineOrdering::Arrival => self.entries.push(entry),
            TimelineOrdering::Timestamp => {
                // Equal timestamps keep arrival order.
                let at = self.entries.partition_point(|existing| {
                    (existing.message.timestamp, existing.seq)
                        <= (entry.message.timestamp, entry.seq)
                });
                self.entries.insert(at, entry);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
