//! Static validation of workflow definitions.
//!
//! All findings are collected into one [`ValidationReport`]; nothing here
//! returns early on the first problem. Traversals follow declaration order so
//! the same workflow always yields the same report.

use crate::registry::ExecutorRegistry;
use pipecore::{
    NodeSpec, NodeType, Severity, Suggestion, ValidationError, ValidationErrorKind,
    ValidationReport, ValidationWarning, Value, WarningKind, WorkflowDefinition, WorkflowError,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

const LARGE_WORKFLOW_NODES: usize = 50;
const MAX_DELAY_NODES: usize = 5;
const MAX_TOTAL_DELAY_MS: f64 = 60_000.0;
const BOTTLENECK_IN_DEGREE: usize = 5;
const MAX_DELAY_MS: f64 = 3_600_000.0;
const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

#[derive(Default, Clone)]
pub struct WorkflowValidator {
    registry: Option<Arc<ExecutorRegistry>>,
}

impl WorkflowValidator {
    /// Validator without executor checks.
    pub fn new() -> Self {
        Self { registry: None }
    }

    /// Also report node types with no registered executor, and run each
    /// executor's own configuration checks.
    pub fn with_registry(registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            registry: Some(registry),
        }
    }

    pub fn validate(&self, workflow: &WorkflowDefinition) -> ValidationReport {
        let mut pass = Pass::new(workflow, self.registry.as_deref());

        pass.check_structure();
        pass.check_nodes();
        pass.check_edges();
        pass.check_compatibility();
        pass.check_flow();
        pass.check_performance();
        pass.suggest_best_practices();

        let report = pass.finish();
        tracing::debug!(
            "Validated workflow {}: {} error(s), {} warning(s), {} suggestion(s)",
            workflow.id,
            report.errors.len(),
            report.warnings.len(),
            report.suggestions.len()
        );
        report
    }
}

/// One validation run over one workflow.
struct Pass<'a> {
    workflow: &'a WorkflowDefinition,
    registry: Option<&'a ExecutorRegistry>,
    nodes: HashMap<&'a str, &'a NodeSpec>,
    errors: Vec<ValidationError>,
    warnings: Vec<ValidationWarning>,
    suggestions: Vec<Suggestion>,
}

impl<'a> Pass<'a> {
    fn new(workflow: &'a WorkflowDefinition, registry: Option<&'a ExecutorRegistry>) -> Self {
        let mut nodes = HashMap::new();
        for node in &workflow.nodes {
            nodes.entry(node.id.as_str()).or_insert(node);
        }
        Self {
            workflow,
            registry,
            nodes,
            errors: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    fn finish(self) -> ValidationReport {
        let is_valid = !self.errors.iter().any(ValidationError::is_critical);
        ValidationReport {
            is_valid,
            errors: self.errors,
            warnings: self.warnings,
            suggestions: self.suggestions,
        }
    }

    fn error(&mut self, kind: ValidationErrorKind, severity: Severity, message: String) -> &mut ValidationError {
        self.errors.push(ValidationError::new(kind, severity, message));
        let last = self.errors.len() - 1;
        &mut self.errors[last]
    }

    fn warn(&mut self, kind: WarningKind, message: String, node_id: Option<&str>) {
        self.warnings.push(ValidationWarning {
            kind,
            message,
            node_id: node_id.map(str::to_string),
        });
    }

    fn suggest(&mut self, message: String, node_id: &str) {
        self.suggestions.push(Suggestion {
            message,
            node_id: Some(node_id.to_string()),
        });
    }

    /// Edges whose endpoints both exist and differ.
    fn sound_edges(&self) -> impl Iterator<Item = (&'a NodeSpec, &'a NodeSpec)> + '_ {
        self.workflow.edges.iter().filter_map(|edge| {
            if edge.source == edge.target {
                return None;
            }
            let source = self.nodes.get(edge.source.as_str())?;
            let target = self.nodes.get(edge.target.as_str())?;
            Some((*source, *target))
        })
    }

    fn adjacency(&self) -> HashMap<&'a str, Vec<&'a str>> {
        let mut out: HashMap<&'a str, Vec<&'a str>> = HashMap::new();
        for (source, target) in self.sound_edges() {
            out.entry(source.id.as_str()).or_default().push(target.id.as_str());
        }
        out
    }

    fn check_structure(&mut self) {
        use ValidationErrorKind::Structural;
        let workflow = self.workflow;

        if workflow.id.trim().is_empty() {
            self.error(Structural, Severity::Critical, "Workflow id is required".into())
                .fix = Some("Give the workflow a unique id".into());
        }
        if workflow.name.trim().is_empty() {
            self.error(Structural, Severity::High, "Workflow name is required".into())
                .fix = Some("Give the workflow a name".into());
        }
        if workflow.version.trim().is_empty() {
            self.error(Structural, Severity::Medium, "Workflow version is missing".into())
                .fix = Some("Set a version such as \"1.0.0\"".into());
        }
        if workflow.nodes.is_empty() {
            self.error(Structural, Severity::Critical, "Workflow has no nodes".into())
                .fix = Some("Add at least a trigger node".into());
        }

        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for node in &workflow.nodes {
            if !seen.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
                self.error(
                    Structural,
                    Severity::Critical,
                    format!("Duplicate node id '{}'", node.id),
                )
                .node_id = Some(node.id.clone());
            }
        }

        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for edge in &workflow.edges {
            if !seen.insert(edge.id.as_str()) && reported.insert(edge.id.as_str()) {
                self.error(
                    Structural,
                    Severity::High,
                    format!("Duplicate edge id '{}'", edge.id),
                )
                .edge_id = Some(edge.id.clone());
            }
        }
    }

    fn check_nodes(&mut self) {
        use ValidationErrorKind::Configuration;
        let workflow = self.workflow;

        for node in &workflow.nodes {
            if node.node_type == NodeType::Unknown {
                let err = self.error(
                    Configuration,
                    Severity::Critical,
                    format!("Node '{}' has an unknown type", node.id),
                );
                err.node_id = Some(node.id.clone());
                err.fix = Some("Use one of the supported node types".into());
                continue;
            }

            if let Some(registry) = self.registry {
                if !registry.contains(node.node_type) {
                    let message = WorkflowError::MissingExecutor {
                        node_id: node.id.clone(),
                        node_type: node.node_type,
                    }
                    .to_string();
                    self.error(Configuration, Severity::Critical, message).node_id =
                        Some(node.id.clone());
                }
            }

            for field in node.node_type.required_config() {
                if node.config(field).map_or(true, Value::is_blank) {
                    let err = self.error(
                        Configuration,
                        Severity::High,
                        format!(
                            "Node '{}' ({}) is missing required config field '{}'",
                            node.id, node.node_type, field
                        ),
                    );
                    err.node_id = Some(node.id.clone());
                    err.fix = Some(format!("Set '{}' in the node configuration", field));
                }
            }

            self.check_node_values(node);

            let problems = self
                .registry
                .and_then(|registry| registry.get(node.node_type))
                .map(|executor| executor.validate(node))
                .unwrap_or_default();
            for problem in problems {
                self.error(
                    Configuration,
                    Severity::High,
                    format!("Node '{}': {}", node.id, problem),
                )
                .node_id = Some(node.id.clone());
            }
        }
    }

    /// Range and format checks for fields that are present.
    fn check_node_values(&mut self, node: &NodeSpec) {
        match node.node_type {
            NodeType::Click => {
                self.check_range(node, "x", 0.0, None);
                self.check_range(node, "y", 0.0, None);
            }
            NodeType::OcrRegion => {
                self.check_range(node, "x", 0.0, None);
                self.check_range(node, "y", 0.0, None);
                self.check_positive(node, "width");
                self.check_positive(node, "height");
            }
            NodeType::LiveDesktop => {
                self.check_range(node, "fps", 1.0, Some(60.0));
                self.check_range(node, "quality", 1.0, Some(100.0));
            }
            NodeType::Delay => self.check_range(node, "duration_ms", 0.0, Some(MAX_DELAY_MS)),
            NodeType::HttpRequest => self.check_http(node),
            NodeType::WebhookTrigger => {
                if let Some(path) = node.config("path").and_then(Value::as_str) {
                    if !path.is_empty() && !path.starts_with('/') {
                        self.value_error(node, Severity::Medium, format!("webhook path '{}' must start with '/'", path));
                    }
                }
            }
            _ => {}
        }
    }

    /// Inclusive bounds; `max: None` leaves the value unbounded above.
    fn check_range(&mut self, node: &NodeSpec, key: &str, min: f64, max: Option<f64>) {
        let Some(value) = node.config(key).filter(|v| !v.is_blank()) else {
            return;
        };
        let Some(n) = value.as_f64() else {
            self.value_error(node, Severity::Medium, format!("'{}' must be a number", key));
            return;
        };
        if n >= min && max.map_or(true, |max| n <= max) {
            return;
        }
        let message = match max {
            Some(max) => format!("'{}' must be between {} and {}, got {}", key, min, max, n),
            None => format!("'{}' must be at least {}, got {}", key, min, n),
        };
        self.value_error(node, Severity::Medium, message);
    }

    fn check_positive(&mut self, node: &NodeSpec, key: &str) {
        let Some(value) = node.config(key).filter(|v| !v.is_blank()) else {
            return;
        };
        match value.as_f64() {
            Some(n) if n > 0.0 => {}
            Some(n) => self.value_error(
                node,
                Severity::Medium,
                format!("'{}' must be greater than 0, got {}", key, n),
            ),
            None => self.value_error(node, Severity::Medium, format!("'{}' must be a number", key)),
        }
    }

    fn check_http(&mut self, node: &NodeSpec) {
        if let Some(raw) = node.config("url").and_then(Value::as_str).filter(|s| !s.trim().is_empty()) {
            match url::Url::parse(raw) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => self.value_error(
                    node,
                    Severity::High,
                    format!("URL scheme '{}' is not supported; use http or https", parsed.scheme()),
                ),
                Err(e) => self.value_error(node, Severity::High, format!("URL '{}' is malformed: {}", raw, e)),
            }
        }
        if let Some(method) = node.config("method").and_then(Value::as_str).filter(|s| !s.trim().is_empty()) {
            if !HTTP_METHODS.contains(&method.to_uppercase().as_str()) {
                self.value_error(node, Severity::Medium, format!("unsupported HTTP method '{}'", method));
            }
        }
    }

    fn value_error(&mut self, node: &NodeSpec, severity: Severity, message: String) {
        self.error(
            ValidationErrorKind::Configuration,
            severity,
            format!("Node '{}': {}", node.id, message),
        )
        .node_id = Some(node.id.clone());
    }

    fn check_edges(&mut self) {
        use ValidationErrorKind::Connection;
        let workflow = self.workflow;

        for edge in &workflow.edges {
            for (role, endpoint) in [("source", &edge.source), ("target", &edge.target)] {
                if !self.nodes.contains_key(endpoint.as_str()) {
                    self.error(
                        Connection,
                        Severity::Critical,
                        format!("Edge '{}' references unknown {} node '{}'", edge.id, role, endpoint),
                    )
                    .edge_id = Some(edge.id.clone());
                }
            }
            if edge.source == edge.target {
                let err = self.error(
                    Connection,
                    Severity::Critical,
                    format!("Edge '{}' connects node '{}' to itself", edge.id, edge.source),
                );
                err.edge_id = Some(edge.id.clone());
                err.node_id = Some(edge.source.clone());
                err.fix = Some("Remove the self-referencing edge".into());
            }
        }
    }

    fn check_compatibility(&mut self) {
        use ValidationErrorKind::Connection;
        let workflow = self.workflow;

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut out_degree: HashMap<&str, usize> = HashMap::new();

        for edge in &workflow.edges {
            if edge.source == edge.target {
                continue;
            }
            let (Some(source), Some(target)) = (
                self.nodes.get(edge.source.as_str()).copied(),
                self.nodes.get(edge.target.as_str()).copied(),
            ) else {
                continue;
            };
            *out_degree.entry(source.id.as_str()).or_default() += 1;
            *in_degree.entry(target.id.as_str()).or_default() += 1;

            if source.node_type == NodeType::Unknown || target.node_type == NodeType::Unknown {
                continue;
            }

            let message = if !source.node_type.rules().allows_target(target.node_type) {
                Some(format!(
                    "Edge '{}' ({} -> {}): {} node cannot connect to {} node",
                    edge.id, source.id, target.id, source.node_type, target.node_type
                ))
            } else if !target.node_type.rules().allows_source(source.node_type) {
                Some(format!(
                    "Edge '{}' ({} -> {}): {} node cannot receive from {} node",
                    edge.id, source.id, target.id, target.node_type, source.node_type
                ))
            } else {
                None
            };
            if let Some(message) = message {
                let err = self.error(Connection, Severity::Critical, message);
                err.edge_id = Some(edge.id.clone());
                err.node_id = Some(target.id.clone());
                err.fix = Some("Remove the edge or insert a compatible node in between".into());
            }
        }

        for node in &workflow.nodes {
            if node.node_type == NodeType::Unknown {
                continue;
            }
            let rules = node.node_type.rules();
            let inputs = in_degree.get(node.id.as_str()).copied().unwrap_or(0);
            let outputs = out_degree.get(node.id.as_str()).copied().unwrap_or(0);

            // A zero maximum is already enforced by the compatibility lists.
            if let Some(max) = rules.max_inputs.filter(|max| *max > 0 && inputs > *max) {
                self.error(
                    Connection,
                    Severity::High,
                    format!("Node '{}' has {} incoming connections; at most {} allowed", node.id, inputs, max),
                )
                .node_id = Some(node.id.clone());
            }
            if let Some(max) = rules.max_outputs.filter(|max| *max > 0 && outputs > *max) {
                self.error(
                    Connection,
                    Severity::High,
                    format!("Node '{}' has {} outgoing connections; at most {} allowed", node.id, outputs, max),
                )
                .node_id = Some(node.id.clone());
            }

            if rules.requires_input && inputs == 0 {
                self.error(
                    Connection,
                    Severity::Medium,
                    format!("Node '{}' requires at least one incoming connection", node.id),
                )
                .node_id = Some(node.id.clone());
            } else if inputs < rules.min_inputs {
                self.error(
                    Connection,
                    Severity::Medium,
                    format!("Node '{}' needs at least {} incoming connection(s)", node.id, rules.min_inputs),
                )
                .node_id = Some(node.id.clone());
            }

            if rules.requires_output && outputs == 0 {
                self.error(
                    Connection,
                    Severity::Medium,
                    format!("Node '{}' requires at least one outgoing connection", node.id),
                )
                .node_id = Some(node.id.clone());
            } else if outputs < rules.min_outputs {
                self.error(
                    Connection,
                    Severity::Medium,
                    format!("Node '{}' needs at least {} outgoing connection(s)", node.id, rules.min_outputs),
                )
                .node_id = Some(node.id.clone());
            }
        }
    }

    fn check_flow(&mut self) {
        let workflow = self.workflow;
        let has_trigger = workflow.nodes.iter().any(|n| n.node_type.is_trigger());
        if !workflow.nodes.is_empty() && !has_trigger {
            self.error(
                ValidationErrorKind::Dependency,
                Severity::Critical,
                "Workflow has no trigger node".into(),
            )
            .fix = Some("Add a manual, schedule or webhook trigger".into());
        }

        let adjacency = self.adjacency();
        self.detect_cycles(&adjacency);
        if has_trigger {
            self.check_reachability(&adjacency);
        }
    }

    /// Depth-first colouring with an explicit frame stack; every back edge
    /// closes a cycle.
    fn detect_cycles(&mut self, adjacency: &HashMap<&'a str, Vec<&'a str>>) {
        let workflow = self.workflow;
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Visited,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut cycles: Vec<Vec<&str>> = Vec::new();
        let mut path: Vec<&str> = Vec::new();
        let mut frames: Vec<(&str, usize)> = Vec::new();
        for root in &workflow.nodes {
            let root = root.id.as_str();
            if marks.contains_key(root) {
                continue;
            }
            marks.insert(root, Mark::Visiting);
            path.push(root);
            frames.push((root, 0));
            while let Some(frame) = frames.last_mut() {
                let (node, cursor) = *frame;
                let children = adjacency.get(node).map(Vec::as_slice).unwrap_or_default();
                let Some(&next) = children.get(cursor) else {
                    frames.pop();
                    path.pop();
                    marks.insert(node, Mark::Visited);
                    continue;
                };
                frame.1 += 1;
                match marks.get(next) {
                    None => {
                        marks.insert(next, Mark::Visiting);
                        path.push(next);
                        frames.push((next, 0));
                    }
                    Some(Mark::Visiting) => {
                        if let Some(start) = path.iter().position(|n| *n == next) {
                            let mut cycle = path[start..].to_vec();
                            cycle.push(next);
                            cycles.push(cycle);
                        }
                    }
                    Some(Mark::Visited) => {}
                }
            }
        }

        let mut seen: HashSet<Vec<&str>> = HashSet::new();
        for cycle in cycles {
            let mut members = cycle[..cycle.len() - 1].to_vec();
            members.sort_unstable();
            if !seen.insert(members) {
                continue;
            }
            let err = self.error(
                ValidationErrorKind::Dependency,
                Severity::Critical,
                format!("Cycle detected: {}", cycle.join(" -> ")),
            );
            err.node_id = Some(cycle[0].to_string());
            err.fix = Some("Remove one of the edges that closes the loop".into());
        }
    }

    fn check_reachability(&mut self, adjacency: &HashMap<&'a str, Vec<&'a str>>) {
        let workflow = self.workflow;
        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for trigger in workflow.trigger_nodes() {
            if reached.insert(trigger.id.as_str()) {
                queue.push_back(trigger.id.as_str());
            }
        }

        while let Some(node) = queue.pop_front() {
            for &next in adjacency.get(node).map(Vec::as_slice).unwrap_or_default() {
                if reached.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        for node in &workflow.nodes {
            if !node.node_type.is_trigger() && !reached.contains(node.id.as_str()) {
                self.warn(
                    WarningKind::Reachability,
                    format!("Node '{}' is not reachable from any trigger and will never run", node.id),
                    Some(node.id.as_str()),
                );
            }
        }
    }

    fn check_performance(&mut self) {
        let workflow = self.workflow;
        let count = workflow.nodes.len();
        if count > LARGE_WORKFLOW_NODES {
            self.warn(
                WarningKind::Performance,
                format!("Workflow has {} nodes; consider splitting it into smaller workflows", count),
                None,
            );
        }

        let delays: Vec<&NodeSpec> = self
            .workflow
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Delay)
            .collect();
        if delays.len() > MAX_DELAY_NODES {
            self.warn(
                WarningKind::Performance,
                format!("Workflow uses {} delay nodes", delays.len()),
                None,
            );
        }
        let total_delay: f64 = delays
            .iter()
            .filter_map(|n| n.config("duration_ms").and_then(Value::as_f64))
            .sum();
        if total_delay > MAX_TOTAL_DELAY_MS {
            self.warn(
                WarningKind::Performance,
                format!("Delay nodes add up to {}ms", total_delay),
                None,
            );
        }

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for (_, target) in self.sound_edges() {
            *in_degree.entry(target.id.as_str()).or_default() += 1;
        }
        for node in &workflow.nodes {
            let inputs = in_degree.get(node.id.as_str()).copied().unwrap_or(0);
            if inputs >= BOTTLENECK_IN_DEGREE {
                self.warn(
                    WarningKind::Performance,
                    format!("Node '{}' waits on {} upstream nodes and may become a bottleneck", node.id, inputs),
                    Some(node.id.as_str()),
                );
            }
        }
    }

    fn suggest_best_practices(&mut self) {
        let workflow = self.workflow;
        for node in &workflow.nodes {
            let label = node.data.label.trim();
            if label.is_empty() {
                self.suggest(format!("Give node '{}' a descriptive label", node.id), &node.id);
            } else if label.chars().count() < 3
                || label.replace(' ', "_").eq_ignore_ascii_case(node.node_type.wire_name())
            {
                self.suggest(
                    format!("Label '{}' on node '{}' is not very descriptive", label, node.id),
                    &node.id,
                );
            }

            if node.node_type == NodeType::HttpRequest && node.config("max_retries").is_none() {
                self.suggest(
                    format!("Set max_retries on HTTP node '{}' to ride out transient failures", node.id),
                    &node.id,
                );
            }

            if node.node_type == NodeType::FileStorage {
                if let Some(path) = node.config("path").and_then(Value::as_str) {
                    if !path.is_empty() && !path.contains('/') && !path.contains('\\') {
                        self.suggest(
                            format!("Storage path '{}' on node '{}' has no directory; group outputs in a folder", path, node.id),
                            &node.id,
                        );
                    }
                }
            }
        }
    }
}
