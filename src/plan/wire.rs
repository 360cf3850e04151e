//! The planner's "levels" wire format.
//!
//! A plan is a mapping from level number to a list of entries. An entry is
//! either a `{parents: [..]}` declaration or a `{id, name, context}` node:
//!
//! ```yaml
//! 1:
//!   - id: 0
//!     name: Research
//!     context: Gather information
//!   - id: c
//!     name: Review
//!     context: Review the research
//! 2:
//!   - parents: [1]
//!   - id: 0
//!     name: Report
//!     context: Write the report
//! ```
//!
//! Local ids are rewritten to `level-localId`. Within a level every node
//! feeds the level's criticism node (`c`); a `parents` entry makes each
//! listed level's criticism node feed the dependent level's work nodes.
//! JSON bodies decode too, since JSON is a subset of YAML.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

use crate::core::node::{Edge, Node, PlanGraph, CRITICISM_SUFFIX};
use crate::{Error, Result};

#[derive(Deserialize)]
#[serde(untagged)]
enum IdInput {
    Str(String),
    Num(u64),
}

impl IdInput {
    fn into_string(self) -> String {
        match self {
            IdInput::Str(s) => s,
            IdInput::Num(n) => n.to_string(),
        }
    }
}

fn deserialize_id_to_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(IdInput::deserialize(deserializer)?.into_string())
}

fn deserialize_ids_to_strings<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = Vec::<IdInput>::deserialize(deserializer)?;
    Ok(ids.into_iter().map(IdInput::into_string).collect())
}

/// A node record as the planner writes it, with a level-local id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireNode {
    #[serde(deserialize_with = "deserialize_id_to_string")]
    pub id: String,
    pub name: String,
    pub context: String,
}

/// One item of a level's list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireEntry {
    Parents {
        #[serde(deserialize_with = "deserialize_ids_to_strings")]
        parents: Vec<String>,
    },
    Node(WireNode),
}

/// A decoded plan: levels in ascending numeric order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WirePlan {
    pub levels: BTreeMap<u64, Vec<WireEntry>>,
}

impl WirePlan {
    /// Decode plan text. Fails if the text is not (yet) a well-formed plan.
    pub fn from_text(text: &str) -> Result<Self> {
        let cleaned = strip_code_fences(text);
        let value: Value = serde_yaml::from_str(&cleaned)?;
        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => return Ok(Self::default()),
            other => {
                return Err(Error::Validation(format!(
                    "plan must be a mapping of levels, got {}",
                    value_kind(&other)
                )))
            }
        };

        let mut levels = BTreeMap::new();
        for (key, entries) in mapping {
            let level = level_number(&key)?;
            let entries: Vec<WireEntry> = match entries {
                Value::Null => Vec::new(),
                other => serde_yaml::from_value(other)?,
            };
            levels.insert(level, entries);
        }
        Ok(Self { levels })
    }
}

/// Models often wrap the plan in a markdown fence.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn level_number(key: &Value) -> Result<u64> {
    let parsed = match key {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::Validation(format!("level key {:?} is not a number", key)))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn global_id(level: u64, local: &str) -> String {
    format!("{}-{}", level, local)
}

/// Flatten a levels plan into nodes and edges with global ids.
///
/// A `parents` entry naming a level that has not appeared yet (or the
/// level itself) contributes no edges. A parent level without a criticism
/// node links all of its nodes instead.
pub fn transform_wire_format(plan: &WirePlan) -> PlanGraph {
    let mut graph = PlanGraph::default();
    let mut seen_edges: HashSet<(String, String)> = HashSet::new();
    let mut level_nodes: HashMap<u64, Vec<String>> = HashMap::new();

    let mut push_edge = |graph: &mut PlanGraph, source: &str, target: &str| {
        if seen_edges.insert((source.to_string(), target.to_string())) {
            graph.edges.push(Edge::new(source, target));
        }
    };

    for (&level, entries) in &plan.levels {
        let mut locals: Vec<&WireNode> = Vec::new();
        let mut parents: Vec<u64> = Vec::new();

        for entry in entries {
            match entry {
                WireEntry::Parents { parents: declared } => {
                    parents.extend(declared.iter().filter_map(|p| p.trim().parse::<u64>().ok()));
                }
                WireEntry::Node(node) => {
                    if !locals.iter().any(|n| n.id == node.id) {
                        locals.push(node);
                    }
                }
            }
        }

        let ids: Vec<String> = locals.iter().map(|n| global_id(level, &n.id)).collect();
        for (node, id) in locals.iter().zip(&ids) {
            graph
                .nodes
                .push(Node::new(id.clone(), node.name.clone(), node.context.clone()));
        }

        let criticism = global_id(level, CRITICISM_SUFFIX);
        let has_criticism = locals.iter().any(|n| n.id == CRITICISM_SUFFIX);
        let workers: Vec<&String> = locals
            .iter()
            .zip(&ids)
            .filter(|(n, _)| n.id != CRITICISM_SUFFIX)
            .map(|(_, id)| id)
            .collect();

        if has_criticism {
            for worker in &workers {
                push_edge(&mut graph, worker, &criticism);
            }
        }

        // Dependents of a parent level: its work nodes, or the criticism
        // node when the level has nothing else.
        let targets: Vec<&String> = if workers.is_empty() {
            ids.iter().collect()
        } else {
            workers
        };

        let mut linked = HashSet::new();
        for parent in parents {
            if parent == level || !linked.insert(parent) {
                continue;
            }
            let Some(parent_ids) = level_nodes.get(&parent) else {
                continue;
            };
            let parent_criticism = global_id(parent, CRITICISM_SUFFIX);
            let sources: Vec<&String> = if parent_ids.contains(&parent_criticism) {
                parent_ids.iter().filter(|id| **id == parent_criticism).collect()
            } else {
                parent_ids.iter().collect()
            };
            for source in sources {
                for target in &targets {
                    push_edge(&mut graph, source, target);
                }
            }
        }

        level_nodes.entry(level).or_default().extend(ids);
    }

    graph
}

/// Decode and flatten plan text in one step.
pub fn parse_plan(text: &str) -> Result<PlanGraph> {
    Ok(transform_wire_format(&WirePlan::from_text(text)?))
}

/// A parse of the plan text received so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanFragment {
    pub graph: PlanGraph,
    /// The highest level seen. Its entries may still be arriving.
    pub last_level: Option<u64>,
}

/// Decode a prefix of a streamed plan.
pub fn parse_fragment(text: &str) -> Result<PlanFragment> {
    let plan = WirePlan::from_text(text)?;
    Ok(PlanFragment {
        graph: transform_wire_format(&plan),
        last_level: plan.levels.keys().next_back().copied(),
    })
}
