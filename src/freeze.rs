//! Frozen inference graphs.
//!
//! Freezing turns the live model into a self-contained dataflow graph: weight
//! variables become constants inside their matmul nodes and every node not
//! needed to compute the requested output is pruned. The result evaluates
//! without the model, its checkpoints or any training code.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{INPUT_NAME, OUTPUT_NAME, concat_rows};
use crate::stage::StageId;
use crate::{Activation, Error, Result, Rows, TwoStageModel, matmul};

pub const GRAPH_FORMAT_VERSION: u32 = 1;

/// Name of the stage-1 output node, present in the full graph only.
pub const EDGE_OUTPUT_NAME: &str = "edge_pts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeOp {
    Placeholder { dim: usize },
    /// `y = x W` with `W` baked in, row-major `(out_dim, in_dim)`.
    MatMul {
        input: String,
        in_dim: usize,
        out_dim: usize,
        weights: Vec<f32>,
    },
    Relu { input: String },
    Sigmoid { input: String },
    Concat { inputs: Vec<String> },
    Identity { input: String },
}

impl NodeOp {
    fn inputs(&self) -> Vec<&str> {
        match self {
            NodeOp::Placeholder { .. } => Vec::new(),
            NodeOp::MatMul { input, .. }
            | NodeOp::Relu { input }
            | NodeOp::Sigmoid { input }
            | NodeOp::Identity { input } => vec![input.as_str()],
            NodeOp::Concat { inputs } => inputs.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub op: NodeOp,
}

/// A dataflow graph in topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenGraph {
    pub format_version: u32,
    pub nodes: Vec<Node>,
}

impl FrozenGraph {
    /// The full forward graph of `model`, including the stage-1 output node.
    pub fn from_model(model: &TwoStageModel) -> Self {
        let mut nodes = vec![Node {
            name: INPUT_NAME.to_owned(),
            op: NodeOp::Placeholder {
                dim: model.input_dim(),
            },
        }];

        let mut prev = INPUT_NAME.to_owned();
        for id in [StageId::EdgePoints, StageId::ContactPoints] {
            if id == StageId::ContactPoints {
                nodes.push(Node {
                    name: EDGE_OUTPUT_NAME.to_owned(),
                    op: NodeOp::Identity {
                        input: prev.clone(),
                    },
                });
                nodes.push(Node {
                    name: "concat".to_owned(),
                    op: NodeOp::Concat {
                        inputs: vec![prev.clone(), INPUT_NAME.to_owned()],
                    },
                });
                prev = "concat".to_owned();
            }

            for layer in model.stage(id).layers() {
                let mm = format!("{}/matmul", layer.name());
                nodes.push(Node {
                    name: mm.clone(),
                    op: NodeOp::MatMul {
                        input: prev,
                        in_dim: layer.in_dim(),
                        out_dim: layer.out_dim(),
                        weights: layer.weights().to_vec(),
                    },
                });
                let act = match layer.activation() {
                    Activation::ReLU => {
                        (format!("{}/relu", layer.name()), NodeOp::Relu { input: mm })
                    }
                    Activation::Sigmoid => (
                        format!("{}/sigmoid", layer.name()),
                        NodeOp::Sigmoid { input: mm },
                    ),
                };
                prev = act.0.clone();
                nodes.push(Node {
                    name: act.0,
                    op: act.1,
                });
            }
        }

        nodes.push(Node {
            name: OUTPUT_NAME.to_owned(),
            op: NodeOp::Identity { input: prev },
        });

        Self {
            format_version: GRAPH_FORMAT_VERSION,
            nodes,
        }
    }

    /// Keep only the nodes that `outputs` depend on.
    pub fn prune(&self, outputs: &[&str]) -> Result<Self> {
        let index: HashMap<&str, &Node> =
            self.nodes.iter().map(|n| (n.name.as_str(), n)).collect();

        let mut keep: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = outputs.to_vec();
        while let Some(name) = stack.pop() {
            let node = index
                .get(name)
                .ok_or_else(|| Error::InvalidData(format!("graph has no node named {name}")))?;
            if keep.insert(node.name.as_str()) {
                stack.extend(node.op.inputs());
            }
        }

        Ok(Self {
            format_version: self.format_version,
            nodes: self
                .nodes
                .iter()
                .filter(|n| keep.contains(n.name.as_str()))
                .cloned()
                .collect(),
        })
    }

    /// Check ordering, references and constant shapes. Returns each node's width.
    pub fn validate(&self) -> Result<HashMap<&str, usize>> {
        if self.format_version != GRAPH_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported graph format_version {}; expected {}",
                self.format_version, GRAPH_FORMAT_VERSION
            )));
        }

        let placeholders = self
            .nodes
            .iter()
            .filter(|n| matches!(n.op, NodeOp::Placeholder { .. }))
            .count();
        if placeholders != 1 {
            return Err(Error::InvalidData(format!(
                "graph must have exactly one placeholder, found {placeholders}"
            )));
        }

        let mut widths: HashMap<&str, usize> = HashMap::new();
        for node in &self.nodes {
            let width_of = |name: &str| {
                widths.get(name).copied().ok_or_else(|| {
                    Error::InvalidData(format!(
                        "node {} reads {name}, which is not defined before it",
                        node.name
                    ))
                })
            };

            let width = match &node.op {
                NodeOp::Placeholder { dim } => {
                    if *dim == 0 {
                        return Err(Error::InvalidShape(format!(
                            "placeholder {} must have a nonzero width",
                            node.name
                        )));
                    }
                    *dim
                }
                NodeOp::MatMul {
                    input,
                    in_dim,
                    out_dim,
                    weights,
                } => {
                    if *in_dim == 0 || *out_dim == 0 {
                        return Err(Error::InvalidShape(format!(
                            "matmul {} has an empty ({in_dim}, {out_dim}) weight matrix",
                            node.name
                        )));
                    }
                    if width_of(input)? != *in_dim || weights.len() != in_dim * out_dim {
                        return Err(Error::InvalidShape(format!(
                            "matmul {} expects ({in_dim}, {out_dim}) weights over its input",
                            node.name
                        )));
                    }
                    *out_dim
                }
                NodeOp::Relu { input } | NodeOp::Sigmoid { input } | NodeOp::Identity { input } => {
                    width_of(input)?
                }
                NodeOp::Concat { inputs } => {
                    let mut total = 0;
                    for i in inputs {
                        total += width_of(i)?;
                    }
                    total
                }
            };
            if widths.insert(node.name.as_str(), width).is_some() {
                return Err(Error::InvalidData(format!(
                    "duplicate node name {}",
                    node.name
                )));
            }
        }
        Ok(widths)
    }

    /// Evaluate `output` for every row of `input`, fed to the single placeholder.
    pub fn run(&self, input: &Rows, output: &str) -> Result<Rows> {
        let widths = self.validate()?;
        let placeholder = self
            .nodes
            .iter()
            .find(|n| matches!(n.op, NodeOp::Placeholder { .. }))
            .ok_or_else(|| Error::InvalidData("graph has no placeholder".to_owned()))?;
        if input.row_len() != widths[placeholder.name.as_str()] {
            return Err(Error::InvalidShape(format!(
                "input row_len {} does not match placeholder {} width {}",
                input.row_len(),
                placeholder.name,
                widths[placeholder.name.as_str()]
            )));
        }
        if !widths.contains_key(output) {
            return Err(Error::InvalidData(format!(
                "graph has no node named {output}"
            )));
        }

        let batch = input.len();
        let mut values: HashMap<&str, Vec<f32>> = HashMap::new();
        for node in &self.nodes {
            let value = match &node.op {
                NodeOp::Placeholder { .. } => input.as_slice().to_vec(),
                NodeOp::MatMul {
                    input,
                    in_dim,
                    out_dim,
                    weights,
                } => {
                    let mut out = vec![0.0; batch * out_dim];
                    if batch > 0 {
                        matmul::forward(
                            batch,
                            *in_dim,
                            *out_dim,
                            &values[input.as_str()],
                            weights,
                            &mut out,
                        );
                    }
                    out
                }
                NodeOp::Relu { input } => {
                    let mut out = values[input.as_str()].clone();
                    Activation::ReLU.apply(&mut out);
                    out
                }
                NodeOp::Sigmoid { input } => {
                    let mut out = values[input.as_str()].clone();
                    Activation::Sigmoid.apply(&mut out);
                    out
                }
                NodeOp::Identity { input } => values[input.as_str()].clone(),
                NodeOp::Concat { inputs } => {
                    let mut out = Vec::new();
                    let mut acc_width = 0;
                    for name in inputs {
                        let w = widths[name.as_str()];
                        let mut joined = Vec::with_capacity(batch * (acc_width + w));
                        concat_rows(batch, &out, acc_width, &values[name.as_str()], w, &mut joined);
                        out = joined;
                        acc_width += w;
                    }
                    out
                }
            };
            values.insert(node.name.as_str(), value);
            if node.name == output {
                break;
            }
        }

        let out = values
            .remove(output)
            .ok_or_else(|| Error::InvalidData(format!("node {output} was not evaluated")))?;
        Rows::from_flat(out, widths[output])
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(p, json).map_err(|e| Error::io(p, e))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
        let graph: FrozenGraph = serde_json::from_str(&s)?;
        graph.validate()?;
        Ok(graph)
    }
}

/// Convert `model` to constants, prune to [`OUTPUT_NAME`] and write it to `path`.
pub fn freeze_model<P: AsRef<Path>>(model: &TwoStageModel, path: P) -> Result<FrozenGraph> {
    let graph = FrozenGraph::from_model(model).prune(&[OUTPUT_NAME])?;
    graph.save(&path)?;
    info!(
        path = %path.as_ref().display(),
        nodes = graph.nodes.len(),
        "saved and frozen"
    );
    Ok(graph)
}
