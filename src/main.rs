use std::process;

use treewire::core::error::Error;
use treewire::ui::output;

fn main() {
    if let Err(err) = treewire::cli::run() {
        match err.downcast_ref::<Error>() {
            Some(chain) => output::error_chain(chain),
            None => eprintln!("error: {err:#}"),
        }
        process::exit(1);
    }
}
