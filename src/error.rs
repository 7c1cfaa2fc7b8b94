use std::fmt;

/// Everything that can go wrong between the CPU counters and the panel.
///
/// Startup treats all of these as fatal. In steady state the sampler
/// logs `NoData` / `TopologyChanged` and skips the frame, and the renderer
/// treats `UsbWriteStalled` as transient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelError {
    /// No USB device with the panel's vendor/product id
    NoDevice,
    /// Could not select the configuration or claim the interface
    ConfigFailed(String),
    /// The claimed interface has no bulk OUT endpoint
    NoBulkOut,
    /// The panel accepted zero bytes of a frame
    UsbWriteStalled,
    /// The OS CPU counter query failed
    NoData(String),
    /// Core count differed from the previous snapshot
    TopologyChanged { previous: usize, current: usize },
    /// Caller passed an unusable argument (e.g. zero rows)
    BadArgs(String),
    /// A buffer or worker thread could not be allocated
    AllocFailed(String),
}

impl fmt::Display for PanelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelError::NoDevice => write!(
                f,
                "couldn't connect to front panel (are you running this on an Intel Xserve?)"
            ),
            PanelError::ConfigFailed(why) => write!(f, "couldn't configure front panel: {}", why),
            PanelError::NoBulkOut => write!(f, "couldn't find bulk output endpoint on front panel"),
            PanelError::UsbWriteStalled => write!(f, "front panel accepted no data"),
            PanelError::NoData(why) => write!(f, "failed to get CPU load data: {}", why),
            PanelError::TopologyChanged { previous, current } => {
                write!(f, "# of cores has changed ({} -> {})", previous, current)
            }
            PanelError::BadArgs(why) => write!(f, "bad arguments: {}", why),
            PanelError::AllocFailed(why) => write!(f, "failed to allocate: {}", why),
        }
    }
}

impl std::error::Error for PanelError {}

impl From<rusb::Error> for PanelError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::NoDevice | rusb::Error::NotFound => PanelError::NoDevice,
            rusb::Error::NoMem => PanelError::AllocFailed(err.to_string()),
            other => PanelError::ConfigFailed(other.to_string()),
        }
    }
}
