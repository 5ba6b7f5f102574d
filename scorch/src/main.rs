use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use scorch_core::WriteOutcome;
use scorch_core::device::Device;
use scorch_core::platform::{self, SystemUnmounter};
use scorch_core::progress::ProgressEvent;
use scorch_core::retry::RetryPolicy;
use scorch_core::write;
use std::io::{IsTerminal, stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

#[derive(Parser)]
#[command(name = "scorch")]
#[command(about = "Write disk images to removable drives", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an image to a removable device
    Write {
        /// Image file to write; .gz/.xz/.zst images are staged first
        #[arg(required = true)]
        image: PathBuf,

        /// Target device by kernel name (e.g. sdb); prompts when omitted
        #[arg(short, long)]
        device: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
    /// List available removable devices
    List,
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`.
/// Disabling it gives a cleaner exit when the user cancels a write, since
/// the `ctrlc` handler only toggles the running flag and the progress bar
/// keeps the line. The original terminal state is restored on drop.
struct TermRestorer {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            let fd = stdout().as_raw_fd();
            if !stdout().is_terminal() {
                return Self {
                    original_termios: None,
                };
            }

            if let Ok(original_termios) = Termios::from_fd(fd) {
                let mut new_termios = original_termios;
                // Disable printing of control characters.
                new_termios.c_lflag &= !ECHOCTL;

                if tcsetattr(fd, TCSANOW, &new_termios).is_ok() {
                    Self {
                        original_termios: Some(original_termios),
                    }
                } else {
                    Self {
                        original_termios: None,
                    }
                }
            } else {
                Self {
                    original_termios: None,
                }
            }
        }
        #[cfg(not(unix))]
        {
            // This is a no-op on non-Unix platforms.
            Self {}
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            let fd = stdout().as_raw_fd();
            // Restore the original terminal settings.
            tcsetattr(fd, TCSANOW, original_termios).ok();
        }
    }
}

/// Resolves the target device, either by the name given on the command line
/// or through an interactive menu.
fn select_device(devices: &[Device], wanted: Option<&str>) -> Result<Device> {
    if devices.is_empty() {
        return Err(anyhow!("No removable devices found."));
    }

    if let Some(name) = wanted {
        return devices
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| anyhow!("'{name}' is not a removable device on this system."));
    }

    let items: Vec<String> = devices.iter().map(|d| d.to_string()).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the target device to WRITE to")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(devices[selection].clone())
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn main() -> Result<()> {
    env_logger::init();

    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    // This flag allows for graceful cancellation of operations.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Set up the Ctrl+C handler to toggle the `running` flag.
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Write { image, device, yes } => {
            let devices = platform::get_removable_devices()?;
            let device = select_device(&devices, device.as_deref())?;

            println!(
                "{} This will erase all data on '{}' ({:.1} GB).",
                style("WARNING:").red().bold(),
                device.name,
                device.size_gb(),
            );
            println!("  Device: {}", style(device.path.display()).cyan());
            println!("  Image:  {}", style(image.display()).cyan());
            println!();

            if yes {
                println!("Proceeding without confirmation (--yes).");
            } else if !confirm_operation("Are you sure you want to proceed?")? {
                println!("Write operation cancelled.");
                return Ok(());
            }

            println!();

            // Only show the staging spinner for images that need staging.
            let is_compressed = image.extension().and_then(|e| e.to_str()).is_some_and(|e| {
                matches!(e.to_lowercase().as_str(), "gz" | "gzip" | "xz" | "zst" | "zstd")
            });

            let stage_pb = if is_compressed {
                ProgressBar::new_spinner()
            } else {
                ProgressBar::hidden()
            };

            let write_pb = ProgressBar::new(0);

            // These closures connect the core library's progress reporting
            // to our UI.
            let on_stage_start = || {
                stage_pb.set_prefix("Staging");
                stage_pb.set_style(
                    ProgressStyle::default_spinner()
                        .template(
                            "{prefix:12} [{elapsed_precise}] {spinner} {bytes} ({bytes_per_sec}) {msg}",
                        )
                        .unwrap(),
                );
                stage_pb.enable_steady_tick(Duration::from_millis(100));
            };
            let on_stage_progress = |bytes| stage_pb.set_position(bytes);

            let on_write_start = |len| {
                if is_compressed {
                    stage_pb.finish_with_message("Staging complete.");
                }
                write_pb.set_length(len);
                write_pb.set_prefix("Writing");
                write_pb.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                        )
                        .unwrap()
                        .progress_chars("■ "),
                );
            };
            let mut on_progress = |event: ProgressEvent| write_pb.set_position(event.written_bytes);

            // Execute the write operation.
            let result = write::run(
                &image,
                &device.path,
                &SystemUnmounter,
                RetryPolicy::default(),
                running,
                on_stage_start,
                on_stage_progress,
                on_write_start,
                &mut on_progress,
            );

            match result {
                Ok(WriteOutcome::Done(session)) => {
                    write_pb.finish_with_message("Write complete.");
                    let retries = session.retried_attempts();
                    if retries > 0 {
                        println!("\n{retries} write attempts had to be retried.");
                    }
                    println!(
                        "\n✨ Successfully flashed {} with {}.",
                        style(device.path.display()).cyan(),
                        style(image.display()).cyan()
                    );
                }
                Ok(WriteOutcome::Cancelled(session)) => {
                    write_pb.finish_and_clear();
                    println!(
                        "\nWrite cancelled after {} of {} bytes.",
                        session.written_bytes(),
                        session.total_size(),
                    );
                }
                Err(e) => {
                    // On error, finish the bars with a failure message to
                    // unblock the terminal.
                    if is_compressed {
                        stage_pb.finish_with_message("❌ Operation failed.");
                    }
                    write_pb.finish_and_clear();
                    return Err(e.into());
                }
            }
        }
        Commands::List => {
            let devices = platform::get_removable_devices()?;
            if devices.is_empty() {
                println!("No removable devices found.");
                return Ok(());
            }

            println!("Found {} removable devices:", devices.len());
            println!(
                "\n  {:<12} {:<25} {:<10} {}",
                "DEVICE", "NAME", "SIZE", "MOUNTED"
            );
            println!("  {:-<12} {:-<25} {:-<10} {:-<20}", "", "", "", "");
            for device in devices {
                let mounted = if device.mounted_partitions.is_empty() {
                    "(none)".to_string()
                } else {
                    device
                        .mounted_partitions
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                println!(
                    "  {:<12} {:<25} {:>8.1} GB  {}",
                    device.path.display(),
                    device.name,
                    device.size_gb(),
                    mounted
                );
            }
        }
    }

    Ok(())
}
