//! Permission documents attached to every gateway of a fleet.

use common::topics::{Channel, TOPIC_ROOT};
use serde_json::{json, Value};

fn topic_resource(kind: &str, channel: Channel) -> String {
    format!("{kind}/{TOPIC_ROOT}/{}/*", channel.as_str())
}

/// Least-privilege IoT policy: a gateway connects under its own thing name,
/// receives commands on `fleet/job/*` and reports on the device channels.
pub fn fleet_policy_document(role_alias: &str) -> Value {
    let publish: Vec<String> = [Channel::Info, Channel::Error, Channel::Data]
        .into_iter()
        .map(|channel| topic_resource("topic", channel))
        .collect();

    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["iot:Connect"],
                "Resource": ["client/${iot:Connection.Thing.ThingName}"]
            },
            {
                "Effect": "Allow",
                "Action": ["iot:Subscribe"],
                "Resource": [topic_resource("topicfilter", Channel::Job)]
            },
            {
                "Effect": "Allow",
                "Action": ["iot:Receive"],
                "Resource": [topic_resource("topic", Channel::Job)]
            },
            {
                "Effect": "Allow",
                "Action": ["iot:Publish"],
                "Resource": publish
            },
            {
                "Effect": "Allow",
                "Action": ["iot:AssumeRoleWithCertificate"],
                "Resource": [format!("rolealias/{role_alias}")]
            }
        ]
    })
}

/// Permissions of the role a gateway assumes through its role alias: its
/// own logs and shadow, site-asset telemetry, and a single tenant stream.
pub fn credentials_role_permissions(fleet_name: &str, tenant_stream: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
                "Resource": [format!("log-group:/edge/{fleet_name}/*")]
            },
            {
                "Effect": "Allow",
                "Action": ["iot:GetThingShadow", "iot:UpdateThingShadow"],
                "Resource": ["thing/${credentials-iot:ThingName}"]
            },
            {
                "Effect": "Allow",
                "Action": ["iotsitewise:BatchPutAssetPropertyValue"],
                "Resource": ["asset/*"]
            },
            {
                "Effect": "Allow",
                "Action": ["kinesis:PutRecord", "kinesis:PutRecords"],
                "Resource": [format!("stream/{tenant_stream}")]
            }
        ]
    })
}
