//! Segment ordering: prerequisites before dependents, always terminating.
//!
//! Both analysis paths end here. The vision path arrives with prerequisite
//! edges the per-page model emitted; the legacy path first asks the model
//! for a preferred order and extra edges, then both feed the same Kahn's
//! algorithm. The sort is deterministic (ties break by the preferred order)
//! and total: unknown ids are dropped and cycles are broken rather than
//! reported, because a model-hallucinated edge must never fail a job.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use edgequake_llm::ChatMessage;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::content::Segment;
use crate::model::{analysis_options, ChatModel};
use crate::pipeline::parse::{parse_ordering, OrderingReply};
use crate::prompts::ordering_prompt;
use crate::retry::{llm_retryable, with_backoff};

/// A prerequisite edge: `before` must be narrated before `after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub before: String,
    pub after: String,
}

/// Reorder `segments` so every prerequisite precedes its dependents.
///
/// `extra_edges` come from the legacy ordering call; the segments' own
/// `prerequisites` fields always contribute edges too. `preferred` is the
/// tie-breaking order (the model's suggestion, or reading order); ids it
/// omits sort after the ones it names, in reading order.
///
/// Every input segment appears in the output exactly once. On a cycle the
/// earliest remaining segment in preferred order is force-emitted and its
/// unmet edges discarded, with a warning.
pub fn topological_order(
    mut segments: Vec<Segment>,
    extra_edges: &[Edge],
    preferred: &[String],
) -> Vec<Segment> {
    let known: HashSet<&str> = segments.iter().map(|s| s.id.as_str()).collect();

    // Rank in the preferred order; unnamed ids keep reading order after it.
    let rank: HashMap<&str, usize> = {
        let mut rank = HashMap::new();
        for (i, id) in preferred.iter().enumerate() {
            rank.entry(id.as_str()).or_insert(i);
        }
        let base = preferred.len();
        for (i, seg) in segments.iter().enumerate() {
            rank.entry(seg.id.as_str()).or_insert(base + i);
        }
        rank
    };

    let mut edges: Vec<(String, String)> = Vec::new();
    for seg in &segments {
        for pre in &seg.prerequisites {
            edges.push((pre.clone(), seg.id.clone()));
        }
    }
    for e in extra_edges {
        edges.push((e.before.clone(), e.after.clone()));
    }
    edges.retain(|(before, after)| {
        let keep =
            known.contains(before.as_str()) && known.contains(after.as_str()) && before != after;
        if !keep {
            debug!("dropping ordering edge {before} -> {after}");
        }
        keep
    });
    edges.sort();
    edges.dedup();

    let mut in_degree: HashMap<&str, usize> = segments.iter().map(|s| (s.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (before, after) in &edges {
        if let Some(d) = in_degree.get_mut(after.as_str()) {
            *d += 1;
        }
        dependents
            .entry(before.as_str())
            .or_default()
            .push(after.as_str());
    }

    let mut emitted: Vec<String> = Vec::with_capacity(segments.len());
    let mut remaining: Vec<&str> = segments.iter().map(|s| s.id.as_str()).collect();
    remaining.sort_by_key(|id| rank[id]);

    while !remaining.is_empty() {
        let next = match remaining.iter().position(|id| in_degree[id] == 0) {
            Some(pos) => remaining.remove(pos),
            None => {
                // Cycle: force the earliest preferred node out.
                let forced = remaining.remove(0);
                warn!(
                    "prerequisite cycle involving '{}' broken; its unmet edges dropped",
                    forced
                );
                forced
            }
        };
        if let Some(deps) = dependents.get(next) {
            for dep in deps {
                if let Some(d) = in_degree.get_mut(dep) {
                    *d = d.saturating_sub(1);
                }
            }
        }
        emitted.push(next.to_string());
    }

    let order: HashMap<&str, usize> = emitted
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    segments.sort_by_key(|s| order[s.id.as_str()]);
    segments
}

/// Legacy path: ask the model for a teaching order and prerequisite edges,
/// then apply [`topological_order`].
///
/// A failed or unparsable ordering call degrades to reading order with the
/// segments' own prerequisite edges — never a fatal error, the legacy
/// analyzer already produced usable segments.
pub async fn order_segments(
    model: &Arc<dyn ChatModel>,
    config: &PipelineConfig,
    segments: Vec<Segment>,
) -> Vec<Segment> {
    if segments.len() < 2 {
        return segments;
    }

    let catalogue: Vec<serde_json::Value> = segments
        .iter()
        .map(|s| {
            serde_json::json!({
                "id": s.id,
                "title": s.title,
                "summary": s.summary,
            })
        })
        .collect();
    let catalogue = serde_json::to_string_pretty(&catalogue).unwrap_or_default();
    let messages = vec![ChatMessage::user(ordering_prompt(&catalogue))];
    let options = analysis_options(config);

    let reply = with_backoff(&config.retry, "segment ordering", llm_retryable, || {
        let model = Arc::clone(model);
        let messages = messages.clone();
        let options = options.clone();
        async move {
            let reply = model.chat(&messages, &options).await?;
            parse_ordering(&reply.content)
        }
    })
    .await;

    let OrderingReply {
        order,
        prerequisites,
    } = match reply {
        Ok(attempted) => attempted.value,
        Err(e) => {
            warn!("ordering call failed, keeping reading order: {e}");
            OrderingReply::default()
        }
    };

    let edges: Vec<Edge> = prerequisites
        .iter()
        .flat_map(|(after, befores)| {
            befores.iter().map(move |before| Edge {
                before: before.clone(),
                after: after.clone(),
            })
        })
        .collect();

    topological_order(segments, &edges, &order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SegmentKind;

    fn seg(id: &str, prereqs: &[&str]) -> Segment {
        Segment {
            id: id.into(),
            title: id.to_uppercase(),
            summary: String::new(),
            narration_notes: String::new(),
            kind: SegmentKind::Concept,
            pages: vec![1],
            prerequisites: prereqs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn ids(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn prerequisites_come_first() {
        let ordered = topological_order(
            vec![seg("a", &["c"]), seg("b", &[]), seg("c", &["b"])],
            &[],
            &[],
        );
        assert_eq!(ids(&ordered), vec!["b", "c", "a"]);
    }

    #[test]
    fn no_edges_keeps_reading_order() {
        let ordered = topological_order(vec![seg("a", &[]), seg("b", &[]), seg("c", &[])], &[], &[]);
        assert_eq!(ids(&ordered), vec!["a", "b", "c"]);
    }

    #[test]
    fn preferred_order_breaks_ties() {
        let ordered = topological_order(
            vec![seg("a", &[]), seg("b", &[]), seg("c", &[])],
            &[],
            &["c".into(), "a".into(), "b".into()],
        );
        assert_eq!(ids(&ordered), vec!["c", "a", "b"]);
    }

    #[test]
    fn preferred_order_never_overrides_an_edge() {
        let ordered = topological_order(
            vec![seg("a", &["b"]), seg("b", &[])],
            &[],
            &["a".into(), "b".into()],
        );
        assert_eq!(ids(&ordered), vec!["b", "a"]);
    }

    #[test]
    fn unknown_ids_in_edges_are_dropped() {
        let ordered = topological_order(
            vec![seg("a", &["ghost"]), seg("b", &[])],
            &[Edge {
                before: "phantom".into(),
                after: "b".into(),
            }],
            &[],
        );
        assert_eq!(ids(&ordered), vec!["a", "b"]);
    }

    #[test]
    fn cycles_break_instead_of_hanging() {
        let ordered = topological_order(vec![seg("a", &["b"]), seg("b", &["a"]), seg("c", &[])], &[], &[]);
        assert_eq!(ordered.len(), 3);
        // "c" has no edges and reading-order rank 2; the cycle members keep
        // their relative reading order once broken.
        assert!(ids(&ordered).contains(&"a"));
        assert!(ids(&ordered).contains(&"b"));
    }

    #[test]
    fn every_segment_appears_exactly_once() {
        let ordered = topological_order(
            vec![
                seg("a", &["b", "c"]),
                seg("b", &["c"]),
                seg("c", &[]),
                seg("d", &["a"]),
            ],
            &[],
            &[],
        );
        assert_eq!(ids(&ordered), vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn extra_edges_combine_with_segment_prerequisites() {
        let ordered = topological_order(
            vec![seg("a", &[]), seg("b", &[])],
            &[Edge {
                before: "b".into(),
                after: "a".into(),
            }],
            &[],
        );
        assert_eq!(ids(&ordered), vec!["b", "a"]);
    }
}
