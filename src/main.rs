use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;

use hidock::{
    Args, OutputFormat, RunOptions, fake_hardware_client, real_hardware_client, run_with_options,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let output_format = args.output_format().unwrap_or(if stdout.is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });
    let options = RunOptions::builder()
        .maybe_log_level(args.log_level())
        .output_format(output_format)
        .session_config(args.session_config())
        .build();
    let (command, maybe_fake_args) = args.into_command_and_fake_args();
    let hardware_client = match maybe_fake_args {
        Some(fake_args) => fake_hardware_client(fake_args.into_recorder()),
        None => real_hardware_client(),
    };

    match run_with_options(command, &mut stdout, hardware_client, options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
