use snafu::Snafu;
use timber_ingester_core::OptionsError;
use timber_observability::ObservabilityError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("failed to initialize observability"))]
    Observability { source: ObservabilityError },
    #[snafu(display("invalid server address"))]
    InvalidServerAddress { source: std::net::AddrParseError },
    #[snafu(display("failed to create object store"))]
    ObjectStore { source: object_store::Error },
    #[snafu(display("io error"))]
    Io { source: std::io::Error },
    #[snafu(display("invalid ingester options"))]
    Options { source: OptionsError },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;
