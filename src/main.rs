/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::process::ExitCode;

use clap::Parser;
use eml_send::{batch, config::Args};

/// Protocol dialogue on, everything else quiet unless `RUST_LOG` says otherwise.
const DEFAULT_LOG_FILTER: &str = "warn,smtp=trace,eml_send=info";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(err) => return fail(err),
    };

    match batch::run(config, std::io::stdout()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => fail(err),
    }
}

fn fail(err: batch::Error) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::FAILURE
}
