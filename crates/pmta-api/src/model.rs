//! Management API response models.
//!
//! Every endpoint answers with an `<rsp><data>...</data></rsp>` envelope. The wire
//! structs mirror that shape; the public structs flatten it.

use serde::{Deserialize, Serialize};

use crate::Result;

/// `GET /status` summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MtaStatus {
    pub version: String,
    /// Uptime as reported by the MTA, e.g. `3d 04:12:55`.
    pub uptime: String,
    /// Recipients waiting in SMTP queues.
    pub queued_recipients: u64,
    /// Domains with queued recipients.
    pub queued_domains: u64,
    /// Queued volume in kilobytes.
    pub queued_kb: f64,
}

/// One `GET /queues` entry (a domain/VMTA pair).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSummary {
    /// `domain/vmta` queue name.
    pub name: String,
    pub recipients: u64,
    pub kb: f64,
    pub mode: String,
}

/// One `GET /vmtas` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmtaStatus {
    pub name: String,
    pub source_ip: String,
    pub delivered: u64,
    pub bounced: u64,
    pub queued: u64,
}

/// One `GET /domains` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainQueueStatus {
    pub name: String,
    pub delivered: u64,
    pub bounced: u64,
    pub queued: u64,
}

#[derive(Debug, Deserialize)]
struct Rsp<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: StatusXml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusXml {
    version: String,
    uptime: String,
    queue: QueueTotalsXml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueueTotalsXml {
    smtp: SmtpQueueXml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SmtpQueueXml {
    rcp: u64,
    dom: u64,
    kb: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueuesData {
    queue: Vec<QueueXml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueueXml {
    name: String,
    rcp: u64,
    kb: f64,
    mode: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmtasData {
    vmta: Vec<VmtaXml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VmtaXml {
    name: String,
    source_ip: String,
    delivered: u64,
    bounced: u64,
    rcp: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DomainsData {
    domain: Vec<DomainXml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DomainXml {
    name: String,
    delivered: u64,
    bounced: u64,
    rcp: u64,
}

pub fn parse_status(xml: &str) -> Result<MtaStatus> {
    let rsp: Rsp<StatusData> = quick_xml::de::from_str(xml)?;
    let status = rsp.data.status;
    Ok(MtaStatus {
        version: status.version.trim().to_string(),
        uptime: status.uptime.trim().to_string(),
        queued_recipients: status.queue.smtp.rcp,
        queued_domains: status.queue.smtp.dom,
        queued_kb: status.queue.smtp.kb,
    })
}

pub fn parse_queues(xml: &str) -> Result<Vec<QueueSummary>> {
    let rsp: Rsp<QueuesData> = quick_xml::de::from_str(xml)?;
    Ok(rsp
        .data
        .queue
        .into_iter()
        .map(|q| QueueSummary {
            name: q.name,
            recipients: q.rcp,
            kb: q.kb,
            mode: q.mode,
        })
        .collect())
}

pub fn parse_vmtas(xml: &str) -> Result<Vec<VmtaStatus>> {
    let rsp: Rsp<VmtasData> = quick_xml::de::from_str(xml)?;
    Ok(rsp
        .data
        .vmta
        .into_iter()
        .map(|v| VmtaStatus {
            name: v.name,
            source_ip: v.source_ip,
            delivered: v.delivered,
            bounced: v.bounced,
            queued: v.rcp,
        })
        .collect())
}

pub fn parse_domains(xml: &str) -> Result<Vec<DomainQueueStatus>> {
    let rsp: Rsp<DomainsData> = quick_xml::de::from_str(xml)?;
    Ok(rsp
        .data
        .domain
        .into_iter()
        .map(|d| DomainQueueStatus {
            name: d.name.to_ascii_lowercase(),
            delivered: d.delivered,
            bounced: d.bounced,
            queued: d.rcp,
        })
        .collect())
}
