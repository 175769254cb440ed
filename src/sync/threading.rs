//! Conversation grouping.
//!
//! Groups ingested messages into threads using reference headers first and
//! normalized subjects as a fallback, then produces the final thread rows
//! that replace the per-message placeholders.

use std::collections::HashMap;

use crate::domain::{Address, Message, MessageId, Thread, ThreadId};

/// A computed conversation and the messages that belong to it.
#[derive(Debug, Clone)]
pub struct ConversationGroup {
    /// The final thread row to store.
    pub thread: Thread,
    /// Cache ids of every message in the conversation.
    pub message_ids: Vec<MessageId>,
    /// Sender of the most recent message, for categorization.
    pub latest_from: Address,
    /// Labels of the most recent message, for categorization.
    pub latest_labels: Vec<String>,
    /// List-Unsubscribe header of the most recent message.
    pub latest_list_unsubscribe: Option<String>,
}

/// Groups messages into conversations.
///
/// A message joins its parent via In-Reply-To, falling back to the most
/// recent resolvable entry of References. Messages with no resolvable parent
/// are merged when their normalized subjects match. The resulting thread id
/// is derived from the root message's cache id, so it never collides with a
/// placeholder thread id.
pub fn group_messages(messages: &[Message]) -> Vec<ConversationGroup> {
    if messages.is_empty() {
        return Vec::new();
    }

    let id_to_idx: HashMap<String, usize> = messages
        .iter()
        .enumerate()
        .map(|(i, msg)| (msg.threading_id(), i))
        .collect();

    // Parent links: In-Reply-To first, then References newest-first.
    let parent: Vec<Option<usize>> = messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            if let Some(reply_to) = &msg.in_reply_to {
                if let Some(&p) = id_to_idx.get(reply_to) {
                    if p != i {
                        return Some(p);
                    }
                }
            }
            for reference in msg.references.iter().rev() {
                if let Some(&p) = id_to_idx.get(reference) {
                    if p != i {
                        return Some(p);
                    }
                }
            }
            None
        })
        .collect();

    // Resolve each message to its root, with a step bound against reference
    // cycles in malformed mail.
    let mut root: Vec<usize> = (0..messages.len()).collect();
    for i in 0..messages.len() {
        let mut current = i;
        let mut steps = 0;
        while let Some(p) = parent[current] {
            current = p;
            steps += 1;
            if steps > 1000 {
                break;
            }
        }
        root[i] = current;
    }

    // Merge rootless conversations that share a normalized subject.
    let mut subject_roots: HashMap<String, usize> = HashMap::new();
    for i in 0..messages.len() {
        if root[i] != i {
            continue;
        }
        let key = normalize_subject(messages[i].subject.as_deref());
        if key.is_empty() {
            continue;
        }
        match subject_roots.get(&key) {
            Some(&canonical) => {
                for r in root.iter_mut() {
                    if *r == i {
                        *r = canonical;
                    }
                }
            }
            None => {
                subject_roots.insert(key, i);
            }
        }
    }

    // Collect members per root, in input (date) order.
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, &r) in root.iter().enumerate() {
        members.entry(r).or_default().push(i);
    }

    let mut roots: Vec<usize> = members.keys().copied().collect();
    roots.sort_unstable();

    roots
        .into_iter()
        .map(|r| build_group(messages, &members[&r], r))
        .collect()
}

fn build_group(messages: &[Message], member_idxs: &[usize], root: usize) -> ConversationGroup {
    let mut ordered: Vec<&Message> = member_idxs.iter().map(|&i| &messages[i]).collect();
    ordered.sort_by_key(|msg| msg.date);

    let first = ordered[0];
    let latest = ordered[ordered.len() - 1];
    let root_msg = &messages[root];

    let mut participants: Vec<String> = Vec::new();
    let mut labels: Vec<String> = Vec::new();
    let mut unread = 0u32;
    let mut starred = false;
    for msg in &ordered {
        if !participants.contains(&msg.from.email) {
            participants.push(msg.from.email.clone());
        }
        for label in &msg.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        if !msg.is_read {
            unread += 1;
        }
        starred |= msg.is_starred;
    }

    let thread = Thread {
        id: ThreadId(format!("thread-{}", root_msg.id.0)),
        account_id: root_msg.account_id.clone(),
        subject: first.subject.clone(),
        snippet: latest.snippet.clone(),
        participants,
        last_message_date: latest.date,
        message_count: ordered.len() as u32,
        unread_count: unread,
        is_starred: starred,
        labels,
    };

    ConversationGroup {
        thread,
        message_ids: ordered.iter().map(|msg| msg.id.clone()).collect(),
        latest_from: latest.from.clone(),
        latest_labels: latest.labels.clone(),
        latest_list_unsubscribe: latest.list_unsubscribe.clone(),
    }
}

/// Strips reply/forward prefixes and normalizes case and whitespace.
fn normalize_subject(subject: Option<&str>) -> String {
    let mut s = subject.unwrap_or("").trim();
    loop {
        let lower = s.to_lowercase();
        let stripped = ["re:", "fwd:", "fw:"]
            .iter()
            .find_map(|prefix| lower.starts_with(prefix).then(|| s[prefix.len()..].trim_start()));
        match stripped {
            Some(rest) => s = rest,
            None => break,
        }
    }
    s.to_lowercase()
}
