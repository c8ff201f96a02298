//! Closed catalogue of node types and their static connection rules.
//!
//! Everything here is keyed by [`NodeType`] through exhaustive matches, so
//! adding a variant forces a decision about its category, required
//! configuration and compatibility.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    ManualTrigger,
    ScheduleTrigger,
    WebhookTrigger,
    Click,
    TypeText,
    Screenshot,
    LiveDesktop,
    OcrRegion,
    OcrExtract,
    HttpRequest,
    Delay,
    IfCondition,
    SetVariable,
    FileStorage,
    Results,
    /// Any type string this build does not recognise.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Trigger,
    Interface,
    Action,
    Logic,
    Sink,
    Unknown,
}

use NodeType::*;

const TRIGGERS: &[NodeType] = &[ManualTrigger, ScheduleTrigger, WebhookTrigger];

const NON_TRIGGERS: &[NodeType] = &[
    Click,
    TypeText,
    Screenshot,
    LiveDesktop,
    OcrRegion,
    OcrExtract,
    HttpRequest,
    Delay,
    IfCondition,
    SetVariable,
    FileStorage,
    Results,
];

const KNOWN: &[NodeType] = &[
    ManualTrigger,
    ScheduleTrigger,
    WebhookTrigger,
    Click,
    TypeText,
    Screenshot,
    LiveDesktop,
    OcrRegion,
    OcrExtract,
    HttpRequest,
    Delay,
    IfCondition,
    SetVariable,
    FileStorage,
    Results,
];

/// Nodes that can hand an image (or a pass-through of one) to OCR.
const IMAGE_SOURCES: &[NodeType] = &[Screenshot, OcrRegion, LiveDesktop, Delay, IfCondition];

const RESULTS_ONLY: &[NodeType] = &[Results];

const NONE: &[NodeType] = &[];

/// Row of the compatibility matrix for one node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRules {
    pub can_connect_to: &'static [NodeType],
    pub can_receive_from: &'static [NodeType],
    pub max_inputs: Option<usize>,
    pub max_outputs: Option<usize>,
    pub min_inputs: usize,
    pub min_outputs: usize,
    pub requires_input: bool,
    pub requires_output: bool,
}

impl ConnectionRules {
    const fn trigger() -> Self {
        Self {
            can_connect_to: NON_TRIGGERS,
            can_receive_from: NONE,
            max_inputs: Some(0),
            max_outputs: None,
            min_inputs: 0,
            min_outputs: 0,
            requires_input: false,
            requires_output: true,
        }
    }

    const fn step() -> Self {
        Self {
            can_connect_to: NON_TRIGGERS,
            can_receive_from: KNOWN,
            max_inputs: None,
            max_outputs: None,
            min_inputs: 0,
            min_outputs: 0,
            requires_input: true,
            requires_output: false,
        }
    }

    pub fn allows_target(&self, target: NodeType) -> bool {
        self.can_connect_to.contains(&target)
    }

    pub fn allows_source(&self, source: NodeType) -> bool {
        self.can_receive_from.contains(&source)
    }
}

impl NodeType {
    /// Every recognised type, in catalogue order.
    pub const ALL: &'static [NodeType] = KNOWN;

    pub fn wire_name(self) -> &'static str {
        match self {
            ManualTrigger => "manual_trigger",
            ScheduleTrigger => "schedule_trigger",
            WebhookTrigger => "webhook_trigger",
            Click => "click",
            TypeText => "type_text",
            Screenshot => "screenshot",
            LiveDesktop => "live_desktop",
            OcrRegion => "ocr_region",
            OcrExtract => "ocr_extract",
            HttpRequest => "http_request",
            Delay => "delay",
            IfCondition => "if_condition",
            SetVariable => "set_variable",
            FileStorage => "file_storage",
            Results => "results",
            Unknown => "unknown",
        }
    }

    pub fn category(self) -> NodeCategory {
        match self {
            ManualTrigger | ScheduleTrigger | WebhookTrigger => NodeCategory::Trigger,
            Click | TypeText | Screenshot | LiveDesktop | OcrRegion | OcrExtract => {
                NodeCategory::Interface
            }
            HttpRequest | Delay => NodeCategory::Action,
            IfCondition | SetVariable => NodeCategory::Logic,
            FileStorage | Results => NodeCategory::Sink,
            Unknown => NodeCategory::Unknown,
        }
    }

    pub fn is_trigger(self) -> bool {
        self.category() == NodeCategory::Trigger
    }

    /// Sinks terminate a pipeline; the critical path ends on one.
    pub fn is_terminal(self) -> bool {
        self.category() == NodeCategory::Sink
    }

    /// Configuration keys that must be present for this type.
    pub fn required_config(self) -> &'static [&'static str] {
        match self {
            ScheduleTrigger => &["schedule"],
            WebhookTrigger => &["path"],
            Click => &["x", "y"],
            TypeText => &["text"],
            LiveDesktop => &["fps", "quality"],
            OcrRegion => &["x", "y", "width", "height"],
            OcrExtract => &["language"],
            HttpRequest => &["url", "method"],
            Delay => &["duration_ms"],
            IfCondition => &["condition"],
            SetVariable => &["name", "value"],
            FileStorage => &["path"],
            ManualTrigger | Screenshot | Results | Unknown => &[],
        }
    }

    pub fn rules(self) -> ConnectionRules {
        match self {
            ManualTrigger | ScheduleTrigger | WebhookTrigger => ConnectionRules::trigger(),
            Click | TypeText | Screenshot | LiveDesktop | OcrRegion | HttpRequest | Delay
            | SetVariable => ConnectionRules::step(),
            OcrExtract => ConnectionRules {
                can_receive_from: IMAGE_SOURCES,
                ..ConnectionRules::step()
            },
            IfCondition => ConnectionRules {
                max_outputs: Some(2),
                min_outputs: 1,
                ..ConnectionRules::step()
            },
            FileStorage => ConnectionRules {
                can_connect_to: RESULTS_ONLY,
                can_receive_from: NON_TRIGGERS,
                ..ConnectionRules::step()
            },
            Results => ConnectionRules {
                can_connect_to: NONE,
                can_receive_from: NON_TRIGGERS,
                max_outputs: Some(0),
                ..ConnectionRules::step()
            },
            Unknown => ConnectionRules {
                can_connect_to: NONE,
                can_receive_from: NONE,
                max_inputs: None,
                max_outputs: None,
                min_inputs: 0,
                min_outputs: 0,
                requires_input: false,
                requires_output: false,
            },
        }
    }

    pub fn triggers() -> &'static [NodeType] {
        TRIGGERS
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}
