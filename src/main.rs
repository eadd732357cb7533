mod auth;
mod cli;
mod db;
mod error;
mod fmt;
mod importer;
mod ledger;
mod models;
mod normalizer;
mod otp;
mod reconciler;
mod reports;
mod settings;
mod validator;

use clap::Parser;

use cli::{
    AccountCommands, AdminCommands, Cli, Commands, ImportsCommands, LoginCommands, OtpCommands,
    ParticipantsCommands,
};

fn init_logging() {
    let filter = std::env::var("PERC_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    env_logger::Builder::new()
        .parse_filters(&filter)
        .format_timestamp(None)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let json = cli.json;

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir, json),
        Commands::Load { path } => cli::load::run(&path),
        Commands::Status => cli::status::run(json),
        Commands::Backup { output } => cli::backup::run(output, json),
        Commands::Import { file, period } => cli::import::run(&file, period.as_deref(), json),
        Commands::Imports { command } => match command {
            ImportsCommands::List { limit } => cli::import::list(limit, json),
            ImportsCommands::Show { id } => cli::import::show(id, json),
        },
        Commands::Participants { command } => match command {
            ParticipantsCommands::List { search, limit } => {
                cli::participants::list(search.as_deref(), limit, json)
            }
            ParticipantsCommands::Show { matricule } => cli::participants::show(&matricule, json),
            ParticipantsCommands::Correct {
                matricule,
                balance,
                reason,
            } => cli::participants::correct(&matricule, balance, reason.as_deref(), json),
        },
        Commands::Stats => cli::stats::run(json),
        Commands::Audit => cli::audit::run(json),
        Commands::Account { command } => match command {
            AccountCommands::Summary => cli::account::summary(json),
            AccountCommands::Balance => cli::account::balance(json),
            AccountCommands::Contributions {
                year,
                page,
                per_page,
            } => cli::account::contributions(year, page, per_page, json),
            AccountCommands::Movements { limit } => cli::account::movements(limit, json),
            AccountCommands::Yearly { year } => cli::account::yearly(year, json),
            AccountCommands::Operations { limit } => cli::account::operations(limit, json),
        },
        Commands::Admin { command } => match command {
            AdminCommands::Add {
                username,
                name,
                email,
            } => cli::auth::add_admin(&username, name.as_deref(), email.as_deref(), json),
        },
        Commands::Login { command } => match command {
            LoginCommands::Admin { username } => cli::auth::login_admin(&username, json),
            LoginCommands::Agent { matricule } => cli::auth::login_agent(&matricule, json),
        },
        Commands::Logout => cli::auth::logout(json),
        Commands::Whoami => cli::auth::whoami(json),
        Commands::Otp { command } => match command {
            OtpCommands::Request { matricule } => cli::otp::request(&matricule, json),
            OtpCommands::Verify { matricule, code } => cli::otp::verify(&matricule, &code, json),
        },
        Commands::Password => cli::auth::set_password(json),
    };

    if let Err(e) = result {
        cli::print_error(&e, json);
        std::process::exit(e.exit_code());
    }
}
