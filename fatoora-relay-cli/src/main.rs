use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fatoora_relay_core::{
    batch::SweepOutcome,
    compliance::ComplianceType,
    config::{Config, PortalType},
    csr::{CompanyProfile, InvoiceCapabilities},
    identity::IdentityRef,
    invoice::SourceInvoice,
    response_text, Relay,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fatoora-relay")]
#[command(about = "ZATCA onboarding and invoice submission relay")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured store directory
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct IdentityArg {
    /// `company:<id>` or `device:<id>`
    #[arg(long)]
    identity: IdentityRef,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the CSR configuration derived from company details
    ConfigureCsr {
        #[command(flatten)]
        identity: IdentityArg,
        #[arg(long)]
        vat: String,
        #[arg(long)]
        company_name: String,
        #[arg(long)]
        city: String,
        #[arg(long)]
        business_category: String,
        /// Will issue standard (B2B) invoices
        #[arg(long)]
        standard: bool,
        /// Will issue simplified (B2C) invoices
        #[arg(long)]
        simplified: bool,
    },
    /// Store a csr-config.properties file as the CSR configuration
    ImportCsrConfig {
        #[command(flatten)]
        identity: IdentityArg,
        #[arg(long)]
        file: PathBuf,
    },
    /// Generate the CSR and private key; prints the base64 request
    CreateCsr {
        #[arg(long)]
        portal: PortalType,
        #[command(flatten)]
        identity: IdentityArg,
    },
    /// Keep an OTP for a later create-csid
    StageOtp {
        #[command(flatten)]
        identity: IdentityArg,
        #[arg(long)]
        otp: String,
    },
    /// Exchange the CSR and OTP for a compliance CSID
    CreateCsid {
        #[arg(long)]
        portal: PortalType,
        #[command(flatten)]
        identity: IdentityArg,
        #[arg(long)]
        otp: Option<String>,
    },
    /// Exchange the compliance CSID for a production CSID
    ProductionCsid {
        #[command(flatten)]
        identity: IdentityArg,
    },
    /// Show the onboarding state
    State {
        #[command(flatten)]
        identity: IdentityArg,
    },
    /// Run one compliance check, or all six when --type is omitted
    Compliance {
        #[arg(long)]
        invoice: String,
        #[command(flatten)]
        identity: IdentityArg,
        /// 1-6
        #[arg(long = "type")]
        compliance_type: Option<ComplianceType>,
        /// Source document (JSON) to store before checking
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Submit an invoice document (JSON)
    Submit {
        #[arg(long)]
        source: PathBuf,
    },
    /// Resubmit stored invoices
    Resubmit {
        #[arg(required = true)]
        invoices: Vec<String>,
        #[arg(long)]
        bypass_background_check: bool,
    },
    /// Show an invoice's status
    Status {
        #[arg(long)]
        invoice: String,
    },
    /// Resubmit recent pending invoices if inside the send window
    Sweep,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn read_source(path: &Path) -> Result<SourceInvoice> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read invoice document {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid invoice document {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(store_dir) = cli.store_dir {
        config.store_dir = store_dir;
    }
    tracing::debug!(store_dir = %config.store_dir.display(), "configuration loaded");
    let relay = Relay::from_config(config).context("failed to start relay")?;

    match cli.command {
        Commands::ConfigureCsr {
            identity,
            vat,
            company_name,
            city,
            business_category,
            standard,
            simplified,
        } => {
            let mut capabilities = InvoiceCapabilities::empty();
            capabilities.set(InvoiceCapabilities::STANDARD, standard);
            capabilities.set(InvoiceCapabilities::SIMPLIFIED, simplified);
            let profile = CompanyProfile {
                vat_number: vat,
                company_name,
                city,
                business_category,
                capabilities,
            };
            let properties = relay
                .configure_csr(&identity.identity, &profile)
                .await
                .context("configure-csr failed")?;
            print!("{}", properties.to_properties_string()?);
        }
        Commands::ImportCsrConfig { identity, file } => {
            let properties = relay
                .import_csr_config(&identity.identity, &file)
                .await
                .with_context(|| format!("failed to import {}", file.display()))?;
            print!("{}", properties.to_properties_string()?);
        }
        Commands::CreateCsr { portal, identity } => {
            let csr = relay
                .create_csr(portal, &identity.identity)
                .await
                .context("create-csr failed")?;
            println!("{csr}");
        }
        Commands::StageOtp { identity, otp } => {
            relay
                .stage_otp(&identity.identity, &otp)
                .await
                .context("stage-otp failed")?;
            println!("OTP staged");
        }
        Commands::CreateCsid {
            portal,
            identity,
            otp,
        } => {
            let blob = relay
                .create_csid(portal, &identity.identity, otp.as_deref())
                .await
                .context("create-csid failed")?;
            println!("{blob}");
        }
        Commands::ProductionCsid { identity } => {
            let blob = relay
                .production_csid(&identity.identity)
                .await
                .context("production-csid failed")?;
            println!("{blob}");
        }
        Commands::State { identity } => {
            println!("{}", relay.onboarding_state(&identity.identity).await?);
        }
        Commands::Compliance {
            invoice,
            identity,
            compliance_type,
            source,
        } => {
            if let Some(path) = source {
                let source = read_source(&path)?;
                if source.invoice_number != invoice {
                    bail!(
                        "document {} is invoice {}, not {invoice}",
                        path.display(),
                        source.invoice_number
                    );
                }
                relay.store_source(source).await?;
            }
            match compliance_type {
                Some(kind) => {
                    let result = relay
                        .zatca_call_compliance(&invoice, kind, &identity.identity)
                        .await
                        .context("compliance check failed")?;
                    print_json(&result)?;
                }
                None => {
                    let results = relay
                        .compliance_all(&invoice, &identity.identity)
                        .await
                        .context("compliance checks failed")?;
                    print_json(&results)?;
                }
            }
        }
        Commands::Submit { source } => {
            let source = read_source(&source)?;
            let number = source.invoice_number.clone();
            let outcome = relay
                .zatca_background(&number, Some(source))
                .await
                .context("submission failed")?;
            println!("{}", outcome.message());
        }
        Commands::Resubmit {
            invoices,
            bypass_background_check,
        } => {
            let report = relay
                .resubmit_invoices(&invoices, bypass_background_check)
                .await;
            print_json(&report)?;
        }
        Commands::Status { invoice } => {
            let Some(record) = relay.invoice_status(&invoice).await? else {
                bail!("invoice {invoice} is not stored");
            };
            println!("{}", record.status);
            println!("badge: {}", response_text::badge(&record.status_text));
            println!("{}", record.status_text);
        }
        Commands::Sweep => {
            let now = chrono::Local::now().fixed_offset();
            match relay.sweep_pending(now).await? {
                SweepOutcome::OutsideWindow => println!("outside send window"),
                SweepOutcome::Ran(report) => print_json(&report)?,
            }
        }
    }

    Ok(())
}
