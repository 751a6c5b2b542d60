//! One full metrics collection run
//!
//! Order of work, and therefore of output:
//!
//! 1. interface dump, then one block of interface lines
//! 2. for each interface, its station dump, then its survey dump
//!
//! Lines are written to the sink as soon as each record is formatted, so a
//! failure halfway through leaves the earlier lines already written.

use std::collections::HashMap;
use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::{MetricLine, format_interface, format_station, format_survey};
use crate::netlink::{Connector, Nl80211Client, QueryError, resolve_device_name};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("kernel query failed: {0}")]
    Query(#[from] QueryError),

    #[error("writing metrics failed: {0}")]
    Write(#[from] io::Error),
}

/// Counts from one collection run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    pub interfaces: usize,
    pub stations: usize,
    pub survey_entries: usize,
    pub lines: usize,
    /// Records dropped because they failed to decode or had no device name
    pub skipped_records: usize,
    /// Per-interface dumps the driver does not support
    pub skipped_dumps: usize,
    /// Dumps the kernel flagged as possibly inconsistent
    pub interrupted_dumps: usize,
}

struct DeviceNames {
    by_index: HashMap<u32, String>,
}

impl DeviceNames {
    fn resolve(&self, ifindex: u32) -> Option<String> {
        self.by_index
            .get(&ifindex)
            .cloned()
            .or_else(|| resolve_device_name(ifindex))
    }
}

fn write_lines<W: Write>(
    sink: &mut W,
    lines: &[MetricLine],
    summary: &mut CollectionSummary,
) -> io::Result<()> {
    for line in lines {
        writeln!(sink, "{line}")?;
    }
    summary.lines += lines.len();
    Ok(())
}

/// Query the kernel and stream every metric line into `sink`
///
/// # Errors
///
/// `CollectError::Query` when a session fails (other than a driver reporting
/// `EOPNOTSUPP` for one interface's station or survey dump, which is skipped),
/// and `CollectError::Write` when the sink fails.
pub fn run_collection<C, W>(
    client: &Nl80211Client<C>,
    sink: &mut W,
) -> Result<CollectionSummary, CollectError>
where
    C: Connector,
    W: Write,
{
    let mut summary = CollectionSummary::default();

    let interfaces = client.collect_interfaces()?;
    summary.skipped_records += interfaces.skipped;
    summary.interrupted_dumps += usize::from(interfaces.interrupted);

    let names = DeviceNames {
        by_index: interfaces
            .records
            .iter()
            .filter_map(|iface| Some((iface.ifindex, iface.name.clone()?)))
            .collect(),
    };

    let mut devices = Vec::with_capacity(interfaces.records.len());
    for iface in &interfaces.records {
        let Some(device) = names.resolve(iface.ifindex) else {
            warn!(ifindex = iface.ifindex, "skipping interface without a device name");
            summary.skipped_records += 1;
            continue;
        };
        write_lines(sink, &format_interface(&device, iface), &mut summary)?;
        devices.push((iface.ifindex, device));
    }
    summary.interfaces = devices.len();

    for (ifindex, device) in &devices {
        match client.collect_stations(*ifindex) {
            Ok(dump) => {
                summary.skipped_records += dump.skipped;
                summary.interrupted_dumps += usize::from(dump.interrupted);
                for station in &dump.records {
                    let Some(name) = record_device(&names, *ifindex, device, station.ifindex)
                    else {
                        summary.skipped_records += 1;
                        continue;
                    };
                    write_lines(sink, &format_station(&name, station), &mut summary)?;
                    summary.stations += 1;
                }
            }
            Err(e) if e.is_unsupported() => {
                warn!(device = %device, "station dump not supported, skipping");
                summary.skipped_dumps += 1;
            }
            Err(e) => return Err(e.into()),
        }

        match client.collect_survey(*ifindex) {
            Ok(dump) => {
                summary.skipped_records += dump.skipped;
                summary.interrupted_dumps += usize::from(dump.interrupted);
                for survey in &dump.records {
                    let Some(name) = record_device(&names, *ifindex, device, survey.ifindex)
                    else {
                        summary.skipped_records += 1;
                        continue;
                    };
                    write_lines(sink, &format_survey(&name, survey), &mut summary)?;
                    summary.survey_entries += 1;
                }
            }
            Err(e) if e.is_unsupported() => {
                warn!(device = %device, "survey dump not supported, skipping");
                summary.skipped_dumps += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    debug!(
        interfaces = summary.interfaces,
        stations = summary.stations,
        survey_entries = summary.survey_entries,
        lines = summary.lines,
        skipped_records = summary.skipped_records,
        skipped_dumps = summary.skipped_dumps,
        interrupted_dumps = summary.interrupted_dumps,
        "collection complete"
    );
    Ok(summary)
}

/// Device name for a record returned by the dump of `queried`
fn record_device(
    names: &DeviceNames,
    queried: u32,
    queried_device: &str,
    record_ifindex: u32,
) -> Option<String> {
    if record_ifindex == queried {
        return Some(queried_device.to_owned());
    }
    let name = names.resolve(record_ifindex);
    if name.is_none() {
        warn!(ifindex = record_ifindex, "skipping record for unknown interface");
    }
    name
}
