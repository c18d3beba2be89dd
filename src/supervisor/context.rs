//! Aggregated view of user and system state
//!
//! [`GlobalContext`] is only mutated by the supervisor loop while it drains
//! events; everything else reads clones or a [`ContextSnapshot`].

use super::intervention::InterventionRecord;
use crate::bus::{GlobalEvent, AGENT_ERROR, AGENT_HEARTBEAT, AGENT_SPAWNED, AGENT_TERMINATED, PAGE_VIEW};
use crate::clock::elapsed_between;
use crate::pool::AgentStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

/// Journey entries included in a snapshot
pub const SNAPSHOT_JOURNEY: usize = 20;

/// Events included in a snapshot
pub const SNAPSHOT_EVENTS: usize = 10;

/// One step of the user's path through the product
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyEntry {
    pub event_type: String,
    pub page: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub start_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub event_count: u64,
    pub last_page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageActivity {
    pub first_viewed: DateTime<Utc>,
    pub last_viewed: DateTime<Utc>,
    pub view_count: u64,
    pub sessions: BTreeSet<String>,
}

/// What the supervisor knows about an agent, learned only from events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMirror {
    pub agent_id: String,
    pub agent_type: Option<String>,
    pub purpose: Option<String>,
    pub page_context: Option<String>,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub task_count: u64,
    pub error_count: u64,
    /// Set once a stuck report went out; cleared by the next heartbeat
    pub stuck_reported: bool,
}

impl AgentMirror {
    fn new(agent_id: &str, seen_at: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            agent_type: None,
            purpose: None,
            page_context: None,
            status: AgentStatus::Active,
            last_heartbeat: seen_at,
            task_count: 0,
            error_count: 0,
            stuck_reported: false,
        }
    }
}

/// Aggregated projection of the event stream
#[derive(Debug, Clone, Serialize)]
pub struct GlobalContext {
    pub recent_journey: VecDeque<JourneyEntry>,
    pub active_sessions: HashMap<String, SessionInfo>,
    /// Latest report per `system:*` or `memory:*` event type
    pub system_health: BTreeMap<String, Value>,
    pub intervention_history: Vec<InterventionRecord>,
    pub active_pages: HashMap<String, PageActivity>,
    pub agents: HashMap<String, AgentMirror>,
    #[serde(skip)]
    journey_capacity: usize,
}

/// Read-only context handed to analyzers and query callers
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub current_page: Option<String>,
    pub session_id: Option<String>,
    pub recent_events: Vec<GlobalEvent>,
    pub recent_journey: Vec<JourneyEntry>,
    pub active_agents: Vec<AgentMirror>,
    pub system_health: BTreeMap<String, Value>,
}

fn payload_string(event: &GlobalEvent, key: &str) -> Option<String> {
    event.payload_str(key).map(str::to_string)
}

fn payload_u64(event: &GlobalEvent, key: &str) -> Option<u64> {
    event.payload.get(key).and_then(Value::as_u64)
}

impl GlobalContext {
    pub fn new(journey_capacity: usize) -> Self {
        Self {
            recent_journey: VecDeque::new(),
            active_sessions: HashMap::new(),
            system_health: BTreeMap::new(),
            intervention_history: Vec::new(),
            active_pages: HashMap::new(),
            agents: HashMap::new(),
            journey_capacity: journey_capacity.max(1),
        }
    }

    /// Fold one event into the projection
    pub fn apply(&mut self, event: &GlobalEvent) {
        if let Some(session_id) = event.session_id() {
            let session = self
                .active_sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionInfo {
                    start_time: event.timestamp,
                    last_seen: event.timestamp,
                    event_count: 0,
                    last_page: None,
                });
            session.event_count += 1;
            session.last_seen = event.timestamp;
            if let Some(page) = event.payload_str("page") {
                session.last_page = Some(page.to_string());
            }
        }

        match event.prefix() {
            "page" => self.apply_page(event),
            "agent" => self.apply_agent(event),
            "system" | "memory" => {
                self.system_health.insert(
                    event.event_type.clone(),
                    json!({
                        "payload": event.payload,
                        "timestamp": event.timestamp.to_rfc3339(),
                    }),
                );
            }
            _ => {}
        }
    }

    fn apply_page(&mut self, event: &GlobalEvent) {
        let page = payload_string(event, "page");
        if self.recent_journey.len() >= self.journey_capacity {
            self.recent_journey.pop_front();
        }
        self.recent_journey.push_back(JourneyEntry {
            event_type: event.event_type.clone(),
            page: page.clone(),
            session_id: payload_string(event, "session_id"),
            timestamp: event.timestamp,
            context: event.payload.clone(),
        });

        if event.event_type != PAGE_VIEW {
            return;
        }
        if let Some(page) = page {
            if !self.active_pages.contains_key(&page) {
                self.evict_stalest_page();
            }
            let activity = self
                .active_pages
                .entry(page)
                .or_insert_with(|| PageActivity {
                    first_viewed: event.timestamp,
                    last_viewed: event.timestamp,
                    view_count: 0,
                    sessions: BTreeSet::new(),
                });
            activity.view_count += 1;
            activity.last_viewed = event.timestamp;
            if let Some(session_id) = event.session_id() {
                activity.sessions.insert(session_id.to_string());
            }
        }
    }

    /// Keep the page table within the journey capacity before a new page is added
    fn evict_stalest_page(&mut self) {
        if self.active_pages.len() < self.journey_capacity {
            return;
        }
        let stalest = self
            .active_pages
            .iter()
            .min_by_key(|(_, activity)| activity.last_viewed)
            .map(|(page, _)| page.clone());
        if let Some(page) = stalest {
            self.active_pages.remove(&page);
        }
    }

    fn apply_agent(&mut self, event: &GlobalEvent) {
        let Some(agent_id) = event.agent_id() else {
            return;
        };

        match event.event_type.as_str() {
            AGENT_SPAWNED => {
                let mut mirror = AgentMirror::new(agent_id, event.timestamp);
                mirror.agent_type = payload_string(event, "agent_type");
                mirror.purpose = payload_string(event, "purpose");
                mirror.page_context = payload_string(event, "page_context");
                self.agents.insert(agent_id.to_string(), mirror);
            }
            AGENT_HEARTBEAT => {
                let mirror = self
                    .agents
                    .entry(agent_id.to_string())
                    .or_insert_with(|| AgentMirror::new(agent_id, event.timestamp));
                mirror.last_heartbeat = event.timestamp;
                mirror.stuck_reported = false;
                if let Some(status) = event.payload_str("status").and_then(AgentStatus::parse) {
                    mirror.status = status;
                }
                if let Some(tasks) = payload_u64(event, "task_count") {
                    mirror.task_count = tasks;
                }
                if let Some(errors) = payload_u64(event, "error_count") {
                    mirror.error_count = errors;
                }
                if mirror.agent_type.is_none() {
                    mirror.agent_type = payload_string(event, "agent_type");
                }
            }
            AGENT_ERROR => {
                if let Some(mirror) = self.agents.get_mut(agent_id) {
                    mirror.status = AgentStatus::Error;
                    mirror.error_count = payload_u64(event, "error_count")
                        .unwrap_or(mirror.error_count + 1);
                }
            }
            AGENT_TERMINATED => {
                self.agents.remove(agent_id);
            }
            _ => {}
        }
    }

    /// Record a finished intervention
    pub fn push_intervention(&mut self, record: InterventionRecord) {
        self.intervention_history.push(record);
    }

    /// Busy agents silent for longer than `stale_after` that have not been reported yet
    pub fn silent_busy_agents(&self, now: DateTime<Utc>, stale_after: Duration) -> Vec<&AgentMirror> {
        self.agents
            .values()
            .filter(|a| {
                a.status == AgentStatus::Busy
                    && !a.stuck_reported
                    && elapsed_between(a.last_heartbeat, now) > stale_after
            })
            .collect()
    }

    pub fn mark_stuck_reported(&mut self, agent_id: &str) {
        if let Some(mirror) = self.agents.get_mut(agent_id) {
            mirror.stuck_reported = true;
        }
    }

    /// Shrink the journey to the snapshot window and drop sessions and pages quiet for `idle_after`
    pub fn trim(&mut self, now: DateTime<Utc>, idle_after: Duration) -> Value {
        let journey_before = self.recent_journey.len();
        while self.recent_journey.len() > SNAPSHOT_JOURNEY {
            self.recent_journey.pop_front();
        }

        let sessions_before = self.active_sessions.len();
        self.active_sessions
            .retain(|_, session| elapsed_between(session.last_seen, now) <= idle_after);

        let pages_before = self.active_pages.len();
        self.active_pages
            .retain(|_, activity| elapsed_between(activity.last_viewed, now) <= idle_after);

        json!({
            "journey_entries_removed": journey_before - self.recent_journey.len(),
            "sessions_removed": sessions_before - self.active_sessions.len(),
            "pages_removed": pages_before - self.active_pages.len(),
        })
    }

    /// Mirrored agents that are serving work or ready to
    pub fn live_agents(&self) -> Vec<AgentMirror> {
        let mut agents: Vec<AgentMirror> = self
            .agents
            .values()
            .filter(|a| a.status.is_live())
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub fn count_with_status(&self, status: AgentStatus) -> usize {
        self.agents.values().filter(|a| a.status == status).count()
    }

    /// Context for analysis or a user query
    pub fn snapshot(
        &self,
        current_page: Option<String>,
        session_id: Option<String>,
        recent_events: Vec<GlobalEvent>,
    ) -> ContextSnapshot {
        let skip = self.recent_journey.len().saturating_sub(SNAPSHOT_JOURNEY);
        ContextSnapshot {
            current_page,
            session_id,
            recent_events,
            recent_journey: self.recent_journey.iter().skip(skip).cloned().collect(),
            active_agents: self.live_agents(),
            system_health: self.system_health.clone(),
        }
    }
}
