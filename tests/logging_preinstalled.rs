//! A subscriber installed by someone else is left in place.

use sinus_daq::logging::{self, LoggingConfig, OutputFormat};
use tracing::Level;

#[test]
fn init_accepts_a_foreign_subscriber() {
    tracing::subscriber::set_global_default(tracing_subscriber::registry())
        .expect("first subscriber in this process");

    logging::init(LoggingConfig::new(Level::TRACE).with_format(OutputFormat::Json)).unwrap();
    logging::init(LoggingConfig::default()).unwrap();
}
