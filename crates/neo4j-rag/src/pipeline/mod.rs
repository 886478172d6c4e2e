//! Directed acyclic dataflow graph of named components
//!
//! Components are added under unique names and connected socket to socket:
//!
//! ```text
//! query_embedder ──► retriever ──┬─► prompt_builder ──► llm ──┬─► answer_builder
//!                                └────────────────────────────┴──►
//! ```
//!
//! A run feeds caller-supplied inputs to open sockets, executes each component once
//! in topological order and returns every output no connection consumed.

pub mod component;
pub mod value;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

use tracing::Instrument;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::GeneratedAnswer;

pub use component::{Component, InputSocket, Inputs, OutputSocket, Outputs};
pub use value::{Value, ValueKind};

/// Caller inputs: component name → socket name → value
pub type PipelineInputs = HashMap<String, HashMap<String, Value>>;

/// A socket-to-socket edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub sender: String,
    pub sender_socket: String,
    pub receiver: String,
    pub receiver_socket: String,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.sender, self.sender_socket, self.receiver, self.receiver_socket
        )
    }
}

struct Node {
    name: String,
    component: Arc<dyn Component>,
    inputs: Vec<InputSocket>,
    outputs: Vec<OutputSocket>,
}

impl Node {
    fn input(&self, socket: &str) -> Option<&InputSocket> {
        self.inputs.iter().find(|s| s.name == socket)
    }

    fn output(&self, socket: &str) -> Option<&OutputSocket> {
        self.outputs.iter().find(|s| s.name == socket)
    }
}

/// Component graph
#[derive(Default)]
pub struct Pipeline {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    connections: Vec<Connection>,
    warmed_up: OnceCell<()>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component under a unique name
    pub fn add_component<C>(&mut self, name: impl Into<String>, component: C) -> Result<()>
    where
        C: Component + 'static,
    {
        self.add_shared(name, Arc::new(component))
    }

    /// Register an already shared component
    pub fn add_shared(&mut self, name: impl Into<String>, component: Arc<dyn Component>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::pipeline("Component name must not be empty"));
        }
        if name.contains('.') {
            return Err(Error::pipeline(format!(
                "Component name '{}' must not contain '.'",
                name
            )));
        }
        if self.index.contains_key(&name) {
            return Err(Error::pipeline(format!(
                "A component named '{}' already exists",
                name
            )));
        }

        tracing::debug!("Adding component '{}' ({})", name, component.type_name());

        let node = Node {
            inputs: component.input_sockets(),
            outputs: component.output_sockets(),
            name: name.clone(),
            component,
        };
        self.index.insert(name, self.nodes.len());
        self.nodes.push(node);
        self.warmed_up = OnceCell::new();
        Ok(())
    }

    /// Names of registered components, in insertion order
    pub fn component_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    fn node(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::pipeline(format!("Unknown component '{}'", name)))
    }

    /// Connect `sender[.socket]` to `receiver[.socket]`
    ///
    /// An omitted socket is resolved to the only type-compatible candidate; when
    /// several remain, a pair with matching socket names wins.
    pub fn connect(&mut self, sender: &str, receiver: &str) -> Result<()> {
        let (sender_name, sender_socket) = split_endpoint(sender);
        let (receiver_name, receiver_socket) = split_endpoint(receiver);

        let sender_idx = self.node(sender_name)?;
        let receiver_idx = self.node(receiver_name)?;
        if sender_idx == receiver_idx {
            return Err(Error::pipeline(format!(
                "Cannot connect '{}' to itself",
                sender_name
            )));
        }

        let sender_node = &self.nodes[sender_idx];
        let receiver_node = &self.nodes[receiver_idx];

        let outputs: Vec<&OutputSocket> = match sender_socket {
            Some(socket) => vec![sender_node.output(socket).ok_or_else(|| {
                Error::pipeline(format!(
                    "Component '{}' has no output socket '{}'",
                    sender_name, socket
                ))
            })?],
            None => sender_node.outputs.iter().collect(),
        };
        let inputs: Vec<&InputSocket> = match receiver_socket {
            Some(socket) => vec![receiver_node.input(socket).ok_or_else(|| {
                Error::pipeline(format!(
                    "Component '{}' has no input socket '{}'",
                    receiver_name, socket
                ))
            })?],
            None => receiver_node.inputs.iter().collect(),
        };

        let mut candidates: Vec<(&OutputSocket, &InputSocket)> = outputs
            .iter()
            .flat_map(|o| inputs.iter().map(move |i| (*o, *i)))
            .filter(|(o, i)| i.kind.accepts(o.kind))
            .collect();

        if candidates.len() > 1 {
            let same_name: Vec<_> = candidates
                .iter()
                .copied()
                .filter(|(o, i)| o.name == i.name)
                .collect();
            if same_name.len() != 1 {
                return Err(Error::pipeline(format!(
                    "Ambiguous connection between '{}' and '{}'; name the sockets explicitly",
                    sender, receiver
                )));
            }
            candidates = same_name;
        }

        let (output, input) = match candidates.as_slice() {
            [pair] => *pair,
            [] if outputs.len() == 1 && inputs.len() == 1 => {
                return Err(Error::pipeline(format!(
                    "Cannot connect {}.{} ({}) to {}.{} ({}): incompatible types",
                    sender_name, outputs[0].name, outputs[0].kind, receiver_name, inputs[0].name, inputs[0].kind
                )));
            }
            _ => {
                return Err(Error::pipeline(format!(
                    "No compatible sockets between '{}' and '{}'",
                    sender, receiver
                )));
            }
        };

        let connection = Connection {
            sender: sender_name.to_string(),
            sender_socket: output.name.clone(),
            receiver: receiver_name.to_string(),
            receiver_socket: input.name.clone(),
        };

        if self.connections.contains(&connection) {
            return Ok(());
        }
        if let Some(existing) = self.connections.iter().find(|c| {
            c.receiver == connection.receiver && c.receiver_socket == connection.receiver_socket
        }) {
            return Err(Error::pipeline(format!(
                "Input {}.{} is already connected to {}.{}",
                existing.receiver, existing.receiver_socket, existing.sender, existing.sender_socket
            )));
        }
        if self.reaches(receiver_name, sender_name) {
            return Err(Error::pipeline(format!(
                "Connecting '{}' to '{}' would create a cycle",
                sender_name, receiver_name
            )));
        }

        tracing::debug!("Connected {}", connection);
        self.connections.push(connection);
        Ok(())
    }

    /// Whether `to` is reachable from `from` along existing connections
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            stack.extend(
                self.connections
                    .iter()
                    .filter(|c| c.sender == current)
                    .map(|c| c.receiver.as_str()),
            );
        }
        false
    }

    /// Input sockets not fed by any connection
    pub fn inputs(&self) -> Vec<(&str, &InputSocket)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.inputs
                    .iter()
                    .filter(|s| !self.is_receiving(&node.name, &s.name))
                    .map(move |s| (node.name.as_str(), s))
            })
            .collect()
    }

    /// Output sockets not consumed by any connection
    pub fn outputs(&self) -> Vec<(&str, &OutputSocket)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.outputs
                    .iter()
                    .filter(|s| !self.is_sending(&node.name, &s.name))
                    .map(move |s| (node.name.as_str(), s))
            })
            .collect()
    }

    fn is_receiving(&self, component: &str, socket: &str) -> bool {
        self.connections
            .iter()
            .any(|c| c.receiver == component && c.receiver_socket == socket)
    }

    fn is_sending(&self, component: &str, socket: &str) -> bool {
        self.connections
            .iter()
            .any(|c| c.sender == component && c.sender_socket == socket)
    }

    /// Execution order: Kahn's algorithm, ties broken by insertion order
    fn topological_order(&self) -> Result<Vec<usize>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.nodes.len()];
        for c in &self.connections {
            let from = self.node(&c.sender)?;
            let to = self.node(&c.receiver)?;
            if edges[from].insert(to) {
                in_degree[to] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.nodes.len()).filter(|i| in_degree[*i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &to in &edges[next] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    ready.insert(to);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::internal("Pipeline graph contains a cycle"));
        }
        Ok(order)
    }

    /// Warm up every component once; concurrent callers wait for the first
    pub async fn warm_up(&self) -> Result<()> {
        self.warmed_up
            .get_or_try_init(|| async {
                for node in &self.nodes {
                    tracing::debug!("Warming up '{}'", node.name);
                    node.component.warm_up().await?;
                }
                Ok::<(), Error>(())
            })
            .await
            .map(|_| ())
    }

    fn validate_inputs(&self, data: &PipelineInputs) -> Result<()> {
        for (component, sockets) in data {
            let idx = self.node(component)?;
            let node = &self.nodes[idx];
            for (socket, value) in sockets {
                let declared = node.input(socket).ok_or_else(|| {
                    Error::pipeline(format!(
                        "Component '{}' has no input socket '{}'",
                        component, socket
                    ))
                })?;
                if self.is_receiving(component, socket) {
                    return Err(Error::pipeline(format!(
                        "Input {}.{} is already fed by a connection",
                        component, socket
                    )));
                }
                if !declared.kind.accepts(value.kind())
                    && !(declared.kind == ValueKind::Filters && value.kind() == ValueKind::Json)
                {
                    return Err(Error::component_input(
                        component.as_str(),
                        socket.as_str(),
                        format!("expected {}, got {}", declared.kind, value.kind()),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Execute the graph once
    pub async fn run(&self, mut data: PipelineInputs) -> Result<PipelineOutput> {
        self.validate_inputs(&data)?;
        let order = self.topological_order()?;
        self.warm_up().await?;

        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, "Running pipeline with {} components", self.nodes.len());

        let mut buffers: Vec<HashMap<String, Value>> = self
            .nodes
            .iter()
            .map(|node| data.remove(&node.name).unwrap_or_default())
            .collect();
        let mut result: HashMap<String, HashMap<String, Value>> = HashMap::new();

        for idx in order {
            let node = &self.nodes[idx];
            let values = std::mem::take(&mut buffers[idx]);

            if let Some(missing) = node
                .inputs
                .iter()
                .find(|s| s.mandatory && !values.contains_key(&s.name))
            {
                return Err(Error::pipeline(format!(
                    "Component '{}' is missing mandatory input '{}'",
                    node.name, missing.name
                )));
            }

            let span = tracing::info_span!("component", name = %node.name, %run_id);
            let mut outputs = node
                .component
                .run(Inputs::new(node.name.clone(), values))
                .instrument(span)
                .await?;

            if let Some(unknown) = outputs.keys().find(|k| node.output(k).is_none()) {
                return Err(Error::internal(format!(
                    "Component '{}' produced undeclared output '{}'",
                    node.name, unknown
                )));
            }

            for c in self.connections.iter().filter(|c| c.sender == node.name) {
                if let Some(value) = outputs.get(&c.sender_socket) {
                    let target = self.node(&c.receiver)?;
                    buffers[target].insert(c.receiver_socket.clone(), value.clone());
                }
            }
            outputs.retain(|socket, _| !self.is_sending(&node.name, socket));
            if !outputs.is_empty() {
                result.insert(node.name.clone(), outputs);
            }
        }

        tracing::info!(%run_id, "Pipeline run finished");
        Ok(PipelineOutput { outputs: result })
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Components:")?;
        for node in &self.nodes {
            writeln!(f, "  - {} ({})", node.name, node.component.type_name())?;
        }
        writeln!(f, "Connections:")?;
        for c in &self.connections {
            writeln!(f, "  - {}", c)?;
        }
        Ok(())
    }
}

fn split_endpoint(endpoint: &str) -> (&str, Option<&str>) {
    match endpoint.split_once('.') {
        Some((component, socket)) => (component, Some(socket)),
        None => (endpoint, None),
    }
}

/// Unconsumed outputs of a run, keyed by component then socket
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    outputs: HashMap<String, HashMap<String, Value>>,
}

impl PipelineOutput {
    pub fn get(&self, component: &str, socket: &str) -> Option<&Value> {
        self.outputs.get(component)?.get(socket)
    }

    pub fn take(&mut self, component: &str, socket: &str) -> Option<Value> {
        self.outputs.get_mut(component)?.remove(socket)
    }

    /// Answers emitted by an answer builder
    pub fn answers(&self, component: &str) -> Option<&[GeneratedAnswer]> {
        match self.get(component, "answers")? {
            Value::Answers(answers) => Some(answers),
            _ => None,
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> HashMap<String, HashMap<String, Value>> {
        self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Test component: declared sockets, echoes `text` into `out` and records calls
    struct Recorder {
        inputs: Vec<InputSocket>,
        outputs: Vec<OutputSocket>,
        calls: Arc<Mutex<Vec<String>>>,
        label: &'static str,
    }

    impl Recorder {
        fn text(label: &'static str, calls: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                inputs: vec![InputSocket::mandatory("text", ValueKind::Text)],
                outputs: vec![OutputSocket::new("out", ValueKind::Text)],
                calls: Arc::clone(calls),
                label,
            }
        }
    }

    #[async_trait]
    impl Component for Recorder {
        fn input_sockets(&self) -> Vec<InputSocket> {
            self.inputs.clone()
        }

        fn output_sockets(&self) -> Vec<OutputSocket> {
            self.outputs.clone()
        }

        async fn run(&self, mut inputs: Inputs) -> Result<Outputs> {
            self.calls.lock().push(self.label.to_string());
            let text = inputs.text("text")?.unwrap_or_default();
            let mut out = Outputs::new();
            for socket in &self.outputs {
                out.insert(socket.name.clone(), Value::Text(format!("{}>{}", text, self.label)));
            }
            Ok(out)
        }
    }

    fn calls() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_add_component_validation() {
        let c = calls();
        let mut p = Pipeline::new();
        p.add_component("a", Recorder::text("a", &c)).unwrap();
        assert!(p.add_component("a", Recorder::text("a", &c)).is_err());
        assert!(p.add_component("a.b", Recorder::text("x", &c)).is_err());
        assert!(p.add_component("", Recorder::text("x", &c)).is_err());
    }

    #[test]
    fn test_connect_resolves_sockets() {
        let c = calls();
        let mut p = Pipeline::new();
        p.add_component("a", Recorder::text("a", &c)).unwrap();
        p.add_component("b", Recorder::text("b", &c)).unwrap();
        p.connect("a", "b").unwrap();
        // Identical connection is a no-op
        p.connect("a.out", "b.text").unwrap();

        assert_eq!(p.connections().len(), 1);
        assert_eq!(p.connections()[0].to_string(), "a.out -> b.text");
    }

    #[test]
    fn test_connect_errors() {
        let c = calls();
        let mut p = Pipeline::new();
        p.add_component("a", Recorder::text("a", &c)).unwrap();
        p.add_component("b", Recorder::text("b", &c)).unwrap();
        p.add_component("c", Recorder::text("c", &c)).unwrap();
        p.add_component(
            "emb",
            Recorder {
                inputs: vec![InputSocket::mandatory("query_embedding", ValueKind::Embedding)],
                outputs: vec![],
                calls: Arc::clone(&c),
                label: "emb",
            },
        )
        .unwrap();

        assert!(p.connect("a", "a").is_err());
        assert!(p.connect("a.missing", "b").is_err());
        assert!(p.connect("missing", "b").is_err());
        assert!(p.connect("a", "emb").is_err());

        p.connect("a", "b").unwrap();
        // b.text is already occupied
        assert!(p.connect("c", "b").is_err());
        // b -> a would close a loop
        assert!(p.connect("b", "a").is_err());
    }

    #[test]
    fn test_ambiguous_connection() {
        let c = calls();
        let mut p = Pipeline::new();
        p.add_component(
            "two_out",
            Recorder {
                inputs: vec![],
                outputs: vec![
                    OutputSocket::new("first", ValueKind::Text),
                    OutputSocket::new("second", ValueKind::Text),
                ],
                calls: Arc::clone(&c),
                label: "two",
            },
        )
        .unwrap();
        p.add_component("b", Recorder::text("b", &c)).unwrap();

        assert!(p.connect("two_out", "b").is_err());
        p.connect("two_out.second", "b").unwrap();
    }

    #[tokio::test]
    async fn test_run_order_and_outputs() {
        let c = calls();
        let mut p = Pipeline::new();
        // Inserted out of dependency order on purpose
        p.add_component("second", Recorder::text("second", &c)).unwrap();
        p.add_component("first", Recorder::text("first", &c)).unwrap();
        p.connect("first", "second").unwrap();

        let mut data = PipelineInputs::new();
        data.entry("first".into())
            .or_default()
            .insert("text".into(), Value::from("q"));

        let output = p.run(data).await.unwrap();

        assert_eq!(*c.lock(), vec!["first".to_string(), "second".to_string()]);
        // first.out was consumed, so only second.out is returned
        assert!(output.get("first", "out").is_none());
        assert_eq!(
            output.get("second", "out"),
            Some(&Value::Text("q>first>second".into()))
        );
    }

    #[tokio::test]
    async fn test_fan_out_clones_values() {
        let c = calls();
        let mut p = Pipeline::new();
        p.add_component("src", Recorder::text("src", &c)).unwrap();
        p.add_component("left", Recorder::text("left", &c)).unwrap();
        p.add_component("right", Recorder::text("right", &c)).unwrap();
        p.connect("src", "left").unwrap();
        p.connect("src", "right").unwrap();

        let mut data = PipelineInputs::new();
        data.entry("src".into()).or_default().insert("text".into(), "x".into());
        let output = p.run(data).await.unwrap();

        assert_eq!(output.get("left", "out"), Some(&Value::Text("x>src>left".into())));
        assert_eq!(output.get("right", "out"), Some(&Value::Text("x>src>right".into())));
    }

    #[tokio::test]
    async fn test_run_input_validation() {
        let c = calls();
        let mut p = Pipeline::new();
        p.add_component("a", Recorder::text("a", &c)).unwrap();
        p.add_component("b", Recorder::text("b", &c)).unwrap();
        p.connect("a", "b").unwrap();

        // b.text is fed by a
        let mut data = PipelineInputs::new();
        data.entry("a".into()).or_default().insert("text".into(), "x".into());
        data.entry("b".into()).or_default().insert("text".into(), "y".into());
        assert!(p.run(data).await.is_err());

        // Wrong type
        let mut data = PipelineInputs::new();
        data.entry("a".into()).or_default().insert("text".into(), Value::Integer(1));
        assert!(p.run(data).await.is_err());

        // Missing mandatory input
        assert!(p.run(PipelineInputs::new()).await.is_err());
        assert!(c.lock().is_empty());
    }

    #[test]
    fn test_open_sockets_and_display() {
        let c = calls();
        let mut p = Pipeline::new();
        p.add_component("a", Recorder::text("a", &c)).unwrap();
        p.add_component("b", Recorder::text("b", &c)).unwrap();
        p.connect("a", "b").unwrap();

        let inputs: Vec<String> = p.inputs().iter().map(|(c, s)| format!("{}.{}", c, s.name)).collect();
        let outputs: Vec<String> = p.outputs().iter().map(|(c, s)| format!("{}.{}", c, s.name)).collect();
        assert_eq!(inputs, vec!["a.text"]);
        assert_eq!(outputs, vec!["b.out"]);

        let rendered = p.to_string();
        assert!(rendered.contains("a (Recorder)"));
        assert!(rendered.contains("a.out -> b.text"));
    }

    /// Counts warm-ups; the first one takes a while
    struct SlowWarmUp {
        warm_ups: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Component for SlowWarmUp {
        fn input_sockets(&self) -> Vec<InputSocket> {
            vec![InputSocket::optional("text", ValueKind::Text)]
        }

        fn output_sockets(&self) -> Vec<OutputSocket> {
            vec![OutputSocket::new("out", ValueKind::Text)]
        }

        async fn warm_up(&self) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            *self.warm_ups.lock() += 1;
            Ok(())
        }

        async fn run(&self, _inputs: Inputs) -> Result<Outputs> {
            Ok(Outputs::from([("out".to_string(), Value::from("warm"))]))
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_warm_up_once() {
        let warm_ups = Arc::new(Mutex::new(0));
        let mut p = Pipeline::new();
        p.add_component("slow", SlowWarmUp { warm_ups: Arc::clone(&warm_ups) }).unwrap();

        let (first, second) = tokio::join!(p.run(PipelineInputs::new()), p.run(PipelineInputs::new()));
        assert_eq!(first.unwrap().get("slow", "out"), Some(&Value::from("warm")));
        assert!(second.is_ok());
        assert_eq!(*warm_ups.lock(), 1);

        p.warm_up().await.unwrap();
        assert_eq!(*warm_ups.lock(), 1);
    }
}
