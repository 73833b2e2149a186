use anyhow::{Context, bail};
use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clinic_core::config::{data_dir_from_env_value, hour_from_env_value};
use clinic_core::constants::{DEFAULT_CLOSING_HOUR, DEFAULT_OPENING_HOUR};
use clinic_core::datetime::{format_date, format_date_time};
use clinic_core::{
    AccountRole, Appointment, Clinic, ClinicHours, CoreConfig, Gender, MedicalRecord, Medication,
    Outcome, OutcomeNote, Patient, StaffFilter, StaffMember,
};
use clinic_types::{HospitalId, RecordId};

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic appointment and medication ledger")]
struct Cli {
    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and any missing tables
    Init,
    /// Show a doctor's unpublished grid times, or bookable slots with --bookable
    Slots {
        doctor: HospitalId,
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
        /// List published FREE slots a patient can book instead
        #[arg(long)]
        bookable: bool,
    },
    /// Publish a FREE slot
    AddSlot {
        doctor: HospitalId,
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
        #[arg(value_parser = parse_time)]
        time: NaiveTime,
    },
    /// Remove an unbooked slot
    RemoveSlot { id: RecordId },
    /// Book a slot for a patient
    Book {
        patient: HospitalId,
        doctor: HospitalId,
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
        #[arg(value_parser = parse_time)]
        time: NaiveTime,
    },
    /// Approve a pending appointment
    Approve { id: RecordId },
    /// Decline a pending appointment, returning the slot to the pool
    Decline { id: RecordId },
    /// Cancel a pending or confirmed appointment
    Cancel { id: RecordId },
    /// Move a booked appointment to another slot
    Reschedule {
        id: RecordId,
        doctor: HospitalId,
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
        #[arg(value_parser = parse_time)]
        time: NaiveTime,
    },
    /// Complete a confirmed appointment and record its outcome
    Complete {
        id: RecordId,
        diagnosis: String,
        treatment: String,
        medication: String,
        quantity: u32,
    },
    /// Show a doctor's remaining schedule for a date (default today)
    Schedule {
        doctor: HospitalId,
        #[arg(value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Show upcoming appointments for a patient or a doctor
    Upcoming {
        #[arg(long, conflicts_with = "doctor", required_unless_present = "doctor")]
        patient: Option<HospitalId>,
        #[arg(long)]
        doctor: Option<HospitalId>,
    },
    /// Show a patient's medical records
    Records {
        patient: HospitalId,
        /// Only records that came from appointments
        #[arg(long)]
        past_appointments: bool,
    },
    /// Show outcomes awaiting dispense
    PendingOutcomes,
    /// Record an outcome for a patient outside any appointment
    RecordOutcome {
        patient: HospitalId,
        diagnosis: String,
        treatment: String,
        medication: String,
        quantity: u32,
    },
    /// Dispense the prescription of an outcome record
    Dispense { record_id: RecordId },
    /// Show the medication inventory
    Inventory {
        /// Only medications at or below their alert level
        #[arg(long)]
        low: bool,
        /// Only medications with a replenishment request
        #[arg(long)]
        pending: bool,
    },
    /// Add a medication to the inventory
    AddMedication {
        name: String,
        stock: u32,
        low_stock_level: u32,
    },
    /// Overwrite a medication's stock and alert level
    UpdateMedication {
        name: String,
        stock: u32,
        low_stock_level: u32,
    },
    /// Remove a medication from the inventory
    RemoveMedication { name: String },
    /// Request more stock of a medication
    RequestReplenish { name: String, amount: u32 },
    /// Approve the pending replenishment of a medication
    ApproveReplenish { name: String },
    /// List doctors
    Doctors,
    /// List staff, optionally filtered
    Staff {
        #[arg(long)]
        role: Option<AccountRole>,
        #[arg(long)]
        gender: Option<Gender>,
        /// Youngest age to include
        #[arg(long, default_value_t = 0)]
        min_age: u32,
        /// Oldest age to include
        #[arg(long, default_value_t = u32::MAX)]
        max_age: u32,
    },
    /// Create an account and staff entry; doctors get a new doctor ID
    AddStaff {
        hospital_id: String,
        role: AccountRole,
        gender: Gender,
        age: u32,
    },
    /// Change a staff member's gender and age
    UpdateStaff {
        hospital_id: HospitalId,
        gender: Gender,
        age: u32,
    },
    /// Remove a staff member and their account
    RemoveStaff { hospital_id: HospitalId },
    /// List the patients a doctor has appointments with
    Patients { doctor: HospitalId },
    /// Change a patient's email and/or contact number
    UpdateContact {
        patient: HospitalId,
        #[arg(long, required_unless_present = "contact_number")]
        email: Option<String>,
        #[arg(long)]
        contact_number: Option<String>,
    },
    /// Show every appointment with its outcome
    Overview,
}

/// Entry point for the `clinic` command line.
///
/// # Environment Variables
/// - `CLINIC_DATA_DIR`: directory holding the table files (default: "clinic_data")
/// - `CLINIC_OPENING_HOUR`: first slot hour (default: 8)
/// - `CLINIC_CLOSING_HOUR`: hour at which the last slot ends (default: 17)
/// - `RUST_LOG`: log filter; logs go to stderr
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clinic=info".parse()?)
                .add_directive("clinic_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = core_config_from_env()?;
    tracing::info!("++ {}", startup_summary(&cfg));

    let clinic = match cli.command {
        Commands::Init => Clinic::initialise(cfg)?,
        _ => Clinic::open(cfg.clone()).with_context(|| {
            format!(
                "cannot open clinic data in {} (run `clinic init` first?)",
                cfg.data_dir().display()
            )
        })?,
    };
    tracing::info!("++ Clinic opened");
    run(&clinic, cli.command, cli.json)
}

fn core_config_from_env() -> anyhow::Result<Arc<CoreConfig>> {
    let data_dir = data_dir_from_env_value(std::env::var("CLINIC_DATA_DIR").ok());
    let opening = hour_from_env_value(
        std::env::var("CLINIC_OPENING_HOUR").ok(),
        DEFAULT_OPENING_HOUR,
    )?;
    let closing = hour_from_env_value(
        std::env::var("CLINIC_CLOSING_HOUR").ok(),
        DEFAULT_CLOSING_HOUR,
    )?;
    let hours = ClinicHours::new(opening, closing)?;
    Ok(Arc::new(CoreConfig::new(data_dir, hours)?))
}

fn startup_summary(cfg: &CoreConfig) -> String {
    let hours = cfg.clinic_hours();
    format!(
        "Clinic data in {}, slots {}:00 to {}:00",
        cfg.data_dir().display(),
        hours.opening(),
        hours.closing()
    )
}

fn run(clinic: &Clinic, command: Commands, json: bool) -> anyhow::Result<()> {
    let appointments = clinic.appointments();
    let medications = clinic.medications();
    let now = Local::now().naive_local();

    match command {
        Commands::Init => {
            println!(
                "Initialised clinic data in {}",
                clinic.config().data_dir().display()
            );
            Ok(())
        }
        Commands::Slots {
            doctor,
            date,
            bookable,
        } => {
            if bookable {
                print_appointments(&appointments.bookable_slots(&doctor, date)?, json)
            } else {
                let times: Vec<String> = appointments
                    .free_slots_for_doctor(&doctor, date)?
                    .iter()
                    .map(|t| t.format("%H:%M").to_string())
                    .collect();
                print_list(&times, json, |t| t.clone())
            }
        }
        Commands::AddSlot { doctor, date, time } => report(
            clinic.add_slot(doctor, date, time)?,
            json,
            describe_appointment,
        ),
        Commands::RemoveSlot { id } => {
            report(appointments.remove_slot(id)?, json, describe_appointment)
        }
        Commands::Book {
            patient,
            doctor,
            date,
            time,
        } => report(
            clinic.book(patient, &doctor, date, time)?,
            json,
            describe_appointment,
        ),
        Commands::Approve { id } => report(appointments.approve(id)?, json, describe_appointment),
        Commands::Decline { id } => report(appointments.decline(id)?, json, describe_appointment),
        Commands::Cancel { id } => report(appointments.cancel(id)?, json, describe_appointment),
        Commands::Reschedule {
            id,
            doctor,
            date,
            time,
        } => report(
            clinic.reschedule(id, &doctor, date, time)?,
            json,
            describe_appointment,
        ),
        Commands::Complete {
            id,
            diagnosis,
            treatment,
            medication,
            quantity,
        } => {
            let note = OutcomeNote::new(&diagnosis, &treatment, &medication, quantity)?;
            report(
                clinic.complete_appointment(id, note)?,
                json,
                |(appointment, record)| {
                    format!(
                        "{}\n{}",
                        describe_appointment(appointment),
                        describe_record(record)
                    )
                },
            )
        }
        Commands::Schedule { doctor, date } => {
            let date = date.unwrap_or(now.date());
            print_appointments(&appointments.schedule_for_doctor(&doctor, date, now)?, json)
        }
        Commands::Upcoming { patient, doctor } => {
            let rows = match (patient, doctor) {
                (Some(patient), _) => appointments.upcoming_for_patient(&patient, now)?,
                (None, Some(doctor)) => appointments.upcoming_for_doctor(&doctor, now.date())?,
                (None, None) => bail!("either --patient or --doctor is required"),
            };
            print_appointments(&rows, json)
        }
        Commands::Records {
            patient,
            past_appointments,
        } => {
            let records = if past_appointments {
                clinic.records().past_appointment_records(&patient)?
            } else {
                clinic.records().records_for_patient(&patient)?
            };
            print_list(&records, json, describe_record)
        }
        Commands::PendingOutcomes => {
            print_list(&clinic.records().pending_outcomes()?, json, describe_record)
        }
        Commands::RecordOutcome {
            patient,
            diagnosis,
            treatment,
            medication,
            quantity,
        } => {
            let note = OutcomeNote::new(&diagnosis, &treatment, &medication, quantity)?;
            report(
                clinic.record_patient_outcome(patient, note)?,
                json,
                describe_record,
            )
        }
        Commands::Dispense { record_id } => {
            report(clinic.dispense_outcome(record_id)?, json, describe_record)
        }
        Commands::Inventory { low, pending } => {
            let rows = if low {
                medications.low_stock()?
            } else if pending {
                medications.pending_replenishments()?
            } else {
                medications.all()?
            };
            print_list(&rows, json, describe_medication)
        }
        Commands::AddMedication {
            name,
            stock,
            low_stock_level,
        } => report(
            medications.add_medication(&name, stock, low_stock_level)?,
            json,
            describe_medication,
        ),
        Commands::UpdateMedication {
            name,
            stock,
            low_stock_level,
        } => report(
            medications.update_levels(&name, stock, low_stock_level)?,
            json,
            describe_medication,
        ),
        Commands::RemoveMedication { name } => report(
            medications.remove_medication(&name)?,
            json,
            describe_medication,
        ),
        Commands::RequestReplenish { name, amount } => report(
            medications.submit_replenish_request(&name, amount)?,
            json,
            describe_medication,
        ),
        Commands::ApproveReplenish { name } => report(
            medications.approve_replenish_request(&name)?,
            json,
            describe_medication,
        ),
        Commands::Doctors => print_list(&clinic.directory().doctors()?, json, describe_staff),
        Commands::Staff {
            role,
            gender,
            min_age,
            max_age,
        } => {
            let filter = StaffFilter {
                role,
                gender,
                age: Some(min_age..=max_age),
            };
            print_list(&clinic.directory().filter_staff(&filter)?, json, describe_staff)
        }
        Commands::AddStaff {
            hospital_id,
            role,
            gender,
            age,
        } => report(
            clinic.directory().add_staff(&hospital_id, role, gender, age)?,
            json,
            describe_staff,
        ),
        Commands::UpdateStaff {
            hospital_id,
            gender,
            age,
        } => report(
            clinic.directory().update_staff(&hospital_id, gender, age)?,
            json,
            describe_staff,
        ),
        Commands::RemoveStaff { hospital_id } => report(
            clinic.directory().remove_staff(&hospital_id)?,
            json,
            describe_staff,
        ),
        Commands::Patients { doctor } => {
            let mut patients = Vec::new();
            for patient_id in appointments.patients_of_doctor(&doctor)? {
                match clinic.directory().patient(&patient_id)? {
                    Some(patient) => patients.push(patient),
                    None => tracing::warn!(
                        "{} has appointments with {} but is not a registered patient",
                        patient_id,
                        doctor
                    ),
                }
            }
            print_list(&patients, json, describe_patient)
        }
        Commands::UpdateContact {
            patient,
            email,
            contact_number,
        } => report(
            clinic.directory().update_patient_contact(
                &patient,
                email.as_deref(),
                contact_number.as_deref(),
            )?,
            json,
            describe_patient,
        ),
        Commands::Overview => print_list(&clinic.appointment_overview()?, json, |row| {
            match &row.outcome {
                Some(record) => format!(
                    "{}\n    {}",
                    describe_appointment(&row.appointment),
                    describe_record(record)
                ),
                None => describe_appointment(&row.appointment),
            }
        }),
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Prints an applied outcome; not-found and conflict answers become the command's error.
fn report<T: Serialize>(
    outcome: Outcome<T>,
    json: bool,
    describe: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    match outcome {
        Outcome::Applied(value) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", describe(&value));
            }
            Ok(())
        }
        Outcome::NotFound => bail!("not found; nothing was changed"),
        Outcome::Conflict(conflict) => bail!("{conflict}; nothing was changed"),
    }
}

fn print_list<T: Serialize>(
    rows: &[T],
    json: bool,
    describe: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
    } else if rows.is_empty() {
        println!("Nothing found.");
    } else {
        for row in rows {
            println!("{}", describe(row));
        }
    }
    Ok(())
}

fn print_appointments(rows: &[Appointment], json: bool) -> anyhow::Result<()> {
    print_list(rows, json, describe_appointment)
}

fn describe_appointment(a: &Appointment) -> String {
    format!(
        "#{} {} doctor {} patient {} [{}]",
        a.id(),
        format_date_time(a.at()),
        a.doctor_id(),
        a.patient_id().map(HospitalId::as_str).unwrap_or("-"),
        a.status()
    )
}

fn describe_record(r: &MedicalRecord) -> String {
    let appointment = r
        .appointment_id()
        .map(|id| format!(" (appointment #{id})"))
        .unwrap_or_default();
    format!(
        "record #{} patient {}{}: {} / {} / {} x{} [{}]",
        r.id(),
        r.patient_id(),
        appointment,
        r.diagnosis(),
        r.treatment(),
        r.medication(),
        r.quantity(),
        r.status()
    )
}

fn describe_medication(m: &Medication) -> String {
    let mut line = format!(
        "{}: stock {}, alert at {}",
        m.name(),
        m.current_stock(),
        m.low_stock_threshold()
    );
    if m.is_low_stock() {
        line.push_str(" (LOW)");
    }
    if m.has_pending_replenishment() {
        line.push_str(&format!(", {} requested", m.replenish_amount()));
    }
    line
}

fn describe_staff(s: &StaffMember) -> String {
    format!(
        "{} {} {} age {}",
        s.doctor_id().unwrap_or(s.hospital_id()),
        s.role().account_role(),
        s.gender(),
        s.age()
    )
}

fn describe_patient(p: &Patient) -> String {
    format!(
        "{} {} {} born {} blood {} email {} phone {}",
        p.patient_id(),
        p.name(),
        p.gender(),
        format_date(p.date_of_birth()),
        p.blood_type(),
        p.email(),
        p.contact_number()
    )
}

// ============================================================================
// ARGUMENT PARSING
// ============================================================================

/// Accepts `2024-11-05` or the table format `05-Nov-2024`.
fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| clinic_core::datetime::parse_date(value).ok())
        .ok_or_else(|| format!("expected YYYY-MM-DD or DD-Mon-YYYY, got {value:?}"))
}

/// Accepts `09:00`, `9:00` or a bare hour such as `9` or `14`.
fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .ok()
        .or_else(|| {
            value
                .parse::<u32>()
                .ok()
                .and_then(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
        })
        .ok_or_else(|| format!("expected HH:MM or an hour, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_accepts_both_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        assert_eq!(parse_date("2024-11-05").unwrap(), expected);
        assert_eq!(parse_date("05-Nov-2024").unwrap(), expected);
        assert!(parse_date("5/11/2024").is_err());
    }

    #[test]
    fn test_parse_time_accepts_hours() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(parse_time("09:00").unwrap(), nine);
        assert_eq!(parse_time("9").unwrap(), nine);
        assert!(parse_time("25").is_err());
        assert!(parse_time("nine").is_err());
    }

    #[test]
    fn test_cli_parses_book() {
        let cli = Cli::try_parse_from([
            "clinic", "book", "P1001", "D001", "2024-11-05", "9", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Book { .. }));
    }

    #[test]
    fn test_cli_parses_staff_management() {
        let cli = Cli::try_parse_from(["clinic", "add-staff", "S05", "doctor", "f", "33"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::AddStaff {
                role: AccountRole::Doctor,
                gender: Gender::Female,
                age: 33,
                ..
            }
        ));

        let cli = Cli::try_parse_from(["clinic", "staff", "--role", "PHARMACIST", "--max-age", "40"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Staff {
                role: Some(AccountRole::Pharmacist),
                min_age: 0,
                max_age: 40,
                ..
            }
        ));
    }

    #[test]
    fn test_update_contact_needs_a_value() {
        assert!(Cli::try_parse_from(["clinic", "update-contact", "P1001"]).is_err());
        assert!(
            Cli::try_parse_from(["clinic", "update-contact", "P1001", "--contact-number", "9123"])
                .is_ok()
        );
    }

    #[test]
    fn test_cli_parses_record_outcome_and_patients() {
        let cli = Cli::try_parse_from([
            "clinic",
            "record-outcome",
            "P1001",
            "Cough",
            "Rest",
            "Paracetamol",
            "2",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::RecordOutcome { quantity: 2, .. }));
        assert!(matches!(
            Cli::try_parse_from(["clinic", "patients", "D001"]).unwrap().command,
            Commands::Patients { .. }
        ));
    }

    #[test]
    fn test_startup_summary_names_directory_and_hours() {
        let cfg = CoreConfig::new("clinic_data".into(), ClinicHours::new(9, 12).unwrap()).unwrap();
        assert_eq!(
            startup_summary(&cfg),
            "Clinic data in clinic_data, slots 9:00 to 12:00"
        );
    }

    #[test]
    fn test_upcoming_requires_a_target() {
        assert!(Cli::try_parse_from(["clinic", "upcoming"]).is_err());
        assert!(Cli::try_parse_from(["clinic", "upcoming", "--doctor", "D001"]).is_ok());
    }
}
