//! Tracking of activity spans: when each instance started and ended.
//!
//! The activity model is itself folded from the timeline's marker events, so
//! it can be projected at any point of any branch, same as cell state.

use crate::activity::ActivityId;
use crate::timeline::{Event, History, Timeline};
use hifitime::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActivityModelError {
    #[error("activity {0:?} started twice")]
    DuplicateStart(ActivityId),

    #[error("activity {0:?} ended without having started")]
    Unstarted(ActivityId),

    #[error("activity {0:?} ended twice")]
    AlreadyEnded(ActivityId),
}

/// A half-open span of virtual time, `[start, end)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Duration,
    pub end: Duration,
}

impl Window {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Merges overlapping and touching windows, returning them in start order.
pub fn collapse_overlapping(mut windows: Vec<Window>) -> Vec<Window> {
    windows.sort_by_key(|window| window.start);
    let mut collapsed: Vec<Window> = Vec::with_capacity(windows.len());
    for window in windows {
        match collapsed.last_mut() {
            Some(last) if window.start <= last.end => {
                last.end = last.end.max(window.end);
            }
            _ => collapsed.push(window),
        }
    }
    collapsed
}

#[derive(Clone, Debug)]
struct Span {
    type_name: Arc<str>,
    start: Duration,
    end: Option<Duration>,
}

/// The start and end times of every activity instance observed so far.
#[derive(Clone, Debug, Default)]
pub struct ActivityModel {
    spans: BTreeMap<ActivityId, Span>,
}

impl ActivityModel {
    pub fn new() -> Self {
        ActivityModel::default()
    }

    /// Rebuilds an activity model from the markers visible at `at`.
    pub fn project(timeline: &Timeline, at: History) -> Result<Self, ActivityModelError> {
        let mut model = ActivityModel::new();
        for (time, event) in timeline.activity_events_up_to(at) {
            match event {
                Event::ActivityStart { id, type_name } => {
                    model.activity_start(id, type_name, time)?
                }
                Event::ActivityEnd { id } => model.activity_end(id, time)?,
                Event::Effect { .. } => {}
            }
        }
        Ok(model)
    }

    pub fn activity_start(
        &mut self,
        id: ActivityId,
        type_name: Arc<str>,
        time: Duration,
    ) -> Result<(), ActivityModelError> {
        if self.spans.contains_key(&id) {
            return Err(ActivityModelError::DuplicateStart(id));
        }
        self.spans.insert(
            id,
            Span {
                type_name,
                start: time,
                end: None,
            },
        );
        Ok(())
    }

    pub fn activity_end(&mut self, id: ActivityId, time: Duration) -> Result<(), ActivityModelError> {
        let span = self
            .spans
            .get_mut(&id)
            .ok_or(ActivityModelError::Unstarted(id))?;
        if span.end.is_some() {
            return Err(ActivityModelError::AlreadyEnded(id));
        }
        span.end = Some(time);
        Ok(())
    }

    /// The span of one instance. An unfinished activity extends to `now`.
    pub fn instance_window(&self, id: ActivityId, now: Duration) -> Option<Window> {
        self.spans.get(&id).map(|span| Window {
            start: span.start,
            end: span.end.unwrap_or(now),
        })
    }

    /// The collapsed spans of every instance of one type.
    pub fn type_windows(&self, type_name: &str, now: Duration) -> Vec<Window> {
        let windows = self
            .spans
            .values()
            .filter(|span| span.type_name.as_ref() == type_name)
            .map(|span| Window {
                start: span.start,
                end: span.end.unwrap_or(now),
            })
            .collect();
        collapse_overlapping(windows)
    }

    pub fn ids(&self) -> impl Iterator<Item = ActivityId> + '_ {
        self.spans.keys().copied()
    }
}
