use std::fmt;

/// Root segment of every fleet topic.
pub const TOPIC_ROOT: &str = "fleet";

/// Channel segment of a fleet topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Cloud to gateway commands.
    Job,
    /// Gateway acknowledgements and health reports.
    Info,
    /// Gateway failure reports.
    Error,
    /// Telemetry, consumed by the data pipeline.
    Data,
}

impl Channel {
    /// Returns the topic segment for the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Job => "job",
            Channel::Info => "info",
            Channel::Error => "error",
            Channel::Data => "data",
        }
    }

    /// Parses a topic segment.
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "job" => Some(Channel::Job),
            "info" => Some(Channel::Info),
            "error" => Some(Channel::Error),
            "data" => Some(Channel::Data),
            _ => None,
        }
    }

    /// Whether gateways publish on this channel.
    pub fn is_device_originated(&self) -> bool {
        !matches!(self, Channel::Job)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `fleet/{channel}/{connectionName}` topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FleetTopic {
    /// Channel segment.
    pub channel: Channel,
    /// Connection the topic is scoped to.
    pub connection_name: String,
}

impl FleetTopic {
    /// Builds a topic for a connection.
    pub fn new(channel: Channel, connection_name: impl Into<String>) -> Self {
        Self {
            channel,
            connection_name: connection_name.into(),
        }
    }

    /// Parses a concrete topic. Wildcards and extra segments are rejected.
    pub fn parse(topic: &str) -> Option<Self> {
        let mut parts = topic.split('/');
        if parts.next()? != TOPIC_ROOT {
            return None;
        }
        let channel = Channel::parse(parts.next()?)?;
        let name = parts.next()?;
        if parts.next().is_some() || name.is_empty() || name.contains(['+', '#']) {
            return None;
        }
        Some(Self::new(channel, name))
    }
}

impl fmt::Display for FleetTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{TOPIC_ROOT}/{}/{}",
            self.channel.as_str(),
            self.connection_name
        )
    }
}

/// Command topic for a connection.
pub fn job_topic(connection_name: &str) -> String {
    FleetTopic::new(Channel::Job, connection_name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_topics() {
        assert_eq!(job_topic("press-01"), "fleet/job/press-01");
        let parsed = FleetTopic::parse("fleet/info/press-01").expect("valid topic");
        assert_eq!(parsed.channel, Channel::Info);
        assert_eq!(parsed.connection_name, "press-01");
        assert_eq!(parsed.to_string(), "fleet/info/press-01");
    }

    #[test]
    fn rejects_foreign_and_wildcard_topics() {
        assert_eq!(FleetTopic::parse("other/info/press-01"), None);
        assert_eq!(FleetTopic::parse("fleet/status/press-01"), None);
        assert_eq!(FleetTopic::parse("fleet/info/+"), None);
        assert_eq!(FleetTopic::parse("fleet/info/press-01/extra"), None);
        assert_eq!(FleetTopic::parse("fleet/info/"), None);
    }

    #[test]
    fn only_job_channel_is_cloud_originated() {
        assert!(!Channel::Job.is_device_originated());
        assert!(Channel::Info.is_device_originated());
        assert!(Channel::Error.is_device_originated());
        assert!(Channel::Data.is_device_originated());
    }
}
