// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Built-in artifact plugins for the stock integration artifact family.

use serde_json::{Map, Value};

use super::{attr_value, local_name, ArtifactMetadata, ArtifactPlugin};

/// Mediator tags shared by flow-bearing artifacts.
const FLOW_MEDIATORS: [&str; 33] = [
    "log",
    "property",
    "propertyGroup",
    "send",
    "call",
    "callout",
    "respond",
    "drop",
    "filter",
    "switch",
    "validate",
    "enrich",
    "payloadFactory",
    "header",
    "xslt",
    "script",
    "aggregate",
    "iterate",
    "clone",
    "cache",
    "throttle",
    "store",
    "dblookup",
    "dbreport",
    "foreach",
    "loopback",
    "call-template",
    "datamapper",
    "jsontransform",
    "makefault",
    "smooks",
    "rewrite",
    "xquery",
];

fn strings(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

/// Name resolution order shared by most extractors.
fn best_name<'a>(attrs: &'a [(String, String)], tag: &'a str) -> &'a str {
    attr_value(attrs, "name")
        .or_else(|| attr_value(attrs, "key"))
        .or_else(|| attr_value(attrs, "context"))
        .unwrap_or(local_name(tag))
}

/// Generic extractor capturing every attribute into `additional`.
fn extract_with_type(artifact_type: &str, tag: &str, attrs: &[(String, String)]) -> ArtifactMetadata {
    let mut additional = Map::new();
    for (k, v) in attrs {
        if k != "name" && k != "xmlns" {
            additional.insert(k.clone(), Value::String(v.clone()));
        }
    }
    ArtifactMetadata {
        artifact_type: artifact_type.to_string(),
        name: best_name(attrs, tag).to_string(),
        xmlns: attr_value(attrs, "xmlns").map(str::to_string),
        additional,
    }
}

macro_rules! extractor {
    ($fn_name:ident, $artifact_type:literal) => {
        fn $fn_name(tag: &str, attrs: &[(String, String)]) -> ArtifactMetadata {
            extract_with_type($artifact_type, tag, attrs)
        }
    };
}

extractor!(extract_api, "api");
extractor!(extract_sequence, "sequence");
extractor!(extract_endpoint, "endpoint");
extractor!(extract_proxy, "proxy");
extractor!(extract_inbound, "inboundEndpoint");
extractor!(extract_message_processor, "messageProcessor");
extractor!(extract_message_store, "messageStore");
extractor!(extract_local_entry, "localEntry");
extractor!(extract_template, "template");
extractor!(extract_task, "task");
extractor!(extract_data_service, "dataService");
extractor!(extract_policy, "policy");

/// The twelve built-in plugins covering the stock artifact family.
pub fn builtin_plugins() -> Vec<ArtifactPlugin> {
    vec![
        ArtifactPlugin {
            id: "api",
            root_tags: strings(&["api"]),
            semantic_boundaries: strings(&["resource", "handlers", "handler"]),
            mediator_tags: strings(&FLOW_MEDIATORS),
            atomic_tags: strings(&["format", "args"]),
            extract: extract_api,
        },
        ArtifactPlugin {
            id: "sequence",
            root_tags: strings(&["sequence"]),
            semantic_boundaries: strings(&["onError"]),
            mediator_tags: strings(&FLOW_MEDIATORS),
            atomic_tags: strings(&["format", "args"]),
            extract: extract_sequence,
        },
        ArtifactPlugin {
            id: "endpoint",
            root_tags: strings(&["endpoint"]),
            semantic_boundaries: strings(&[
                "address",
                "http",
                "wsdl",
                "loadbalance",
                "failover",
                "recipientlist",
            ]),
            mediator_tags: Vec::new(),
            atomic_tags: strings(&["enableSec", "enableRM", "enableAddressing"]),
            extract: extract_endpoint,
        },
        ArtifactPlugin {
            id: "proxy",
            root_tags: strings(&["proxy"]),
            semantic_boundaries: strings(&[
                "target",
                "inSequence",
                "outSequence",
                "faultSequence",
                "publishWSDL",
            ]),
            mediator_tags: strings(&FLOW_MEDIATORS),
            atomic_tags: strings(&["format", "args"]),
            extract: extract_proxy,
        },
        ArtifactPlugin {
            id: "inboundEndpoint",
            root_tags: strings(&["inboundEndpoint"]),
            semantic_boundaries: strings(&["parameters", "parameter"]),
            mediator_tags: Vec::new(),
            atomic_tags: Vec::new(),
            extract: extract_inbound,
        },
        ArtifactPlugin {
            id: "messageProcessor",
            root_tags: strings(&["messageProcessor"]),
            semantic_boundaries: strings(&["parameter"]),
            mediator_tags: Vec::new(),
            atomic_tags: Vec::new(),
            extract: extract_message_processor,
        },
        ArtifactPlugin {
            id: "messageStore",
            root_tags: strings(&["messageStore"]),
            semantic_boundaries: strings(&["parameter"]),
            mediator_tags: Vec::new(),
            atomic_tags: Vec::new(),
            extract: extract_message_store,
        },
        ArtifactPlugin {
            id: "localEntry",
            root_tags: strings(&["localEntry"]),
            semantic_boundaries: Vec::new(),
            mediator_tags: Vec::new(),
            atomic_tags: Vec::new(),
            extract: extract_local_entry,
        },
        ArtifactPlugin {
            id: "template",
            root_tags: strings(&["template"]),
            semantic_boundaries: strings(&["parameter"]),
            mediator_tags: strings(&FLOW_MEDIATORS),
            atomic_tags: strings(&["format", "args"]),
            extract: extract_template,
        },
        ArtifactPlugin {
            id: "task",
            root_tags: strings(&["task"]),
            semantic_boundaries: strings(&["trigger", "property"]),
            mediator_tags: Vec::new(),
            atomic_tags: Vec::new(),
            extract: extract_task,
        },
        ArtifactPlugin {
            id: "dataService",
            root_tags: strings(&["data", "dataService"]),
            semantic_boundaries: strings(&["config", "query", "operation", "resource"]),
            mediator_tags: Vec::new(),
            atomic_tags: strings(&["sql", "expression"]),
            extract: extract_data_service,
        },
        ArtifactPlugin {
            id: "policy",
            root_tags: strings(&["wsp:Policy", "Policy"]),
            semantic_boundaries: strings(&["wsp:All", "wsp:ExactlyOne"]),
            mediator_tags: Vec::new(),
            atomic_tags: Vec::new(),
            extract: extract_policy,
        },
    ]
}
