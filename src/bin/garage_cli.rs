use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use garage_crm::{
    config::{self, AppConfig},
    db,
    entities::{inventory_item, invoice, job},
    services::{invoicing::DEFAULT_TAX_RATE, technicians::TechnicianWorkload},
    GarageServices,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);

    if let Commands::Migrate = cli.command {
        garage_crm::migrator::run_migration(config.database_url())
            .await
            .context("failed to run migrations")?;
        println!("Migrations applied");
        return Ok(());
    }

    let context = CliContext::initialize(config).await?;
    match cli.command {
        Commands::Migrate => {}
        Commands::LowStock => handle_low_stock(&context, cli.json).await?,
        Commands::Workload => handle_workload(&context, cli.json).await?,
        Commands::GenerateInvoice {
            job_id,
            tax_rate,
            discount,
        } => handle_generate_invoice(&context, job_id, tax_rate, discount, cli.json).await?,
        Commands::ConvertAppointment { appointment_id } => {
            handle_convert_appointment(&context, appointment_id, cli.json).await?
        }
        Commands::PayInvoice { invoice_id, amount } => {
            handle_pay_invoice(&context, invoice_id, amount, cli.json).await?
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "garage-cli", about = "Garage CRM operator commands", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// List items at or below their minimum stock
    LowStock,
    /// Show open job counts per technician
    Workload,
    /// Create (or fetch) the invoice for a job
    GenerateInvoice {
        job_id: Uuid,
        #[arg(long, default_value_t = DEFAULT_TAX_RATE)]
        tax_rate: Decimal,
        #[arg(long, default_value_t = Decimal::ZERO)]
        discount: Decimal,
    },
    /// Turn an appointment into a New Lead job
    ConvertAppointment { appointment_id: Uuid },
    /// Record a payment on an invoice; defaults to the full remaining balance
    PayInvoice {
        invoice_id: Uuid,
        #[arg(long)]
        amount: Option<Decimal>,
    },
}

struct CliContext {
    services: GarageServices,
}

impl CliContext {
    async fn initialize(config: AppConfig) -> Result<Self> {
        let pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
        }

        let services = GarageServices::from_config(Arc::new(pool), &config)?;
        Ok(Self { services })
    }
}

async fn handle_low_stock(context: &CliContext, json: bool) -> Result<()> {
    let items = context
        .services
        .inventory
        .low_stock_items()
        .await
        .context("failed to query low stock items")?;

    if json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("No items below minimum stock");
    }
    for item in &items {
        render_item(item);
    }
    Ok(())
}

async fn handle_workload(context: &CliContext, json: bool) -> Result<()> {
    let roster = context
        .services
        .technicians
        .roster_with_workload()
        .await
        .context("failed to compute technician workload")?;

    if json {
        return print_json(&roster);
    }
    for entry in &roster {
        render_workload(entry);
    }
    Ok(())
}

async fn handle_generate_invoice(
    context: &CliContext,
    job_id: Uuid,
    tax_rate: Decimal,
    discount: Decimal,
    json: bool,
) -> Result<()> {
    let invoice = context
        .services
        .invoices
        .generate_invoice_for_job(job_id, tax_rate, discount)
        .await
        .with_context(|| format!("failed to generate invoice for job {}", job_id))?;

    if json {
        return print_json(&invoice);
    }
    render_invoice(&invoice);
    Ok(())
}

async fn handle_convert_appointment(
    context: &CliContext,
    appointment_id: Uuid,
    json: bool,
) -> Result<()> {
    let job = context
        .services
        .appointments
        .convert_appointment_to_job(appointment_id)
        .await
        .with_context(|| format!("failed to convert appointment {}", appointment_id))?;

    if json {
        return print_json(&job);
    }
    render_job(&job);
    Ok(())
}

async fn handle_pay_invoice(
    context: &CliContext,
    invoice_id: Uuid,
    amount: Option<Decimal>,
    json: bool,
) -> Result<()> {
    let invoice = context
        .services
        .invoices
        .mark_invoice_paid(invoice_id, amount)
        .await
        .with_context(|| format!("failed to record payment on invoice {}", invoice_id))?;

    if json {
        return print_json(&invoice);
    }
    render_invoice(&invoice);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_item(item: &inventory_item::Model) {
    println!(
        "- {} [{}] • {} {} on hand • minimum {}",
        item.name, item.category, item.quantity, item.unit, item.min_stock
    );
}

fn render_workload(entry: &TechnicianWorkload) {
    println!(
        "- {} ({}) • {} • {} open job(s)",
        entry.technician.name, entry.technician.specialty, entry.technician.status, entry.open_jobs
    );
}

fn render_invoice(invoice: &invoice::Model) {
    println!(
        "Invoice {} • job {} • total {} • paid {} • {}",
        invoice.invoice_number,
        invoice.job_id,
        invoice.total_amount.round_dp(2),
        invoice.paid_amount.round_dp(2),
        invoice.payment_status
    );
}

fn render_job(job: &job::Model) {
    println!(
        "Job {} • {} • {} ({}) • stage {}",
        job.id, job.customer_name, job.vehicle_name, job.plate_number, job.stage
    );
}
