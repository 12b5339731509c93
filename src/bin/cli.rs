// Exam Monitor CLI
// Drives the monitor as a student or proctor and validates presence flows end to end

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use exam_monitor::config::IceConfig;
use exam_monitor::monitor::{ActivityKind, ClientMessage, EventType, ServerMessage};
use exam_monitor::proctor::ProctorPeers;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

#[derive(Parser)]
#[command(name = "monitor-cli")]
#[command(about = "Exam Monitor CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get advertised STUN/TURN configuration
    Config,

    /// Test WebSocket connection
    Connect,

    /// Join an exam as a student and report focus changes interactively
    Student {
        #[arg(short, long)]
        exam: String,

        #[arg(short = 'i', long)]
        student_id: String,

        #[arg(short, long)]
        name: Option<String>,
    },

    /// Join an exam as a proctor and print the live table
    Watch {
        #[arg(short, long)]
        exam: String,

        /// Id students address signals to
        #[arg(short, long, default_value = "proctor-cli")]
        proctor_id: String,

        /// Negotiate receive-only video with students that announce readiness
        #[arg(long)]
        video: bool,
    },

    /// Push a graded submission through the HTTP hook
    Submit {
        #[arg(short, long)]
        exam: String,

        #[arg(short = 'i', long)]
        student_id: String,

        #[arg(long)]
        score: u32,

        #[arg(long)]
        total: u32,
    },

    /// Ask every student in the exam to re-announce its state
    Sync {
        #[arg(short, long)]
        exam: String,
    },

    /// Print a student's activity log and the status it replays to
    Activity {
        #[arg(short, long)]
        exam: String,

        #[arg(short = 'i', long)]
        student_id: String,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Config => {
            check_config(&cli.server).await;
        }
        Commands::Connect => {
            test_connection(&cli.server).await;
        }
        Commands::Student {
            exam,
            student_id,
            name,
        } => {
            student_mode(&cli.server, exam, student_id, name.as_deref()).await;
        }
        Commands::Watch {
            exam,
            proctor_id,
            video,
        } => {
            watch_exam(&cli.server, exam, proctor_id, *video).await;
        }
        Commands::Submit {
            exam,
            student_id,
            score,
            total,
        } => {
            submit(&cli.server, exam, student_id, *score, *total).await;
        }
        Commands::Sync { exam } => {
            request_sync(&cli.server, exam).await;
        }
        Commands::Activity { exam, student_id } => {
            show_activity(&cli.server, exam, student_id).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

fn ws_url(server: &str) -> String {
    format!("ws://{}/monitor", server)
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/monitor/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn fetch_ice_config(server: &str) -> Option<IceConfig> {
    let url = format!("http://{}/monitor/config", server);
    let body = reqwest::get(&url).await.ok()?.json::<serde_json::Value>().await.ok()?;

    let stun_servers = body["stunServers"]
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    let turn_servers = body["turnServers"]
        .as_array()
        .map(|servers| {
            servers
                .iter()
                .filter_map(|turn| {
                    Some(exam_monitor::config::TurnServer {
                        urls: turn["urls"]
                            .as_array()?
                            .iter()
                            .filter_map(|u| u.as_str().map(str::to_string))
                            .collect(),
                        username: turn["username"].as_str()?.to_string(),
                        credential: turn["credential"].as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(IceConfig {
        stun_servers,
        turn_servers,
    })
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/monitor/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("\nConfiguration:");
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
                    );
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let url = ws_url(server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            println!("  URL: {}", url);
            drop(ws_stream);
            println!("{} Connection closed cleanly", "✓".green());
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
        }
    }
}

async fn connect(server: &str) -> Option<(WsWrite, WsRead)> {
    match connect_async(&ws_url(server)).await {
        Ok((ws_stream, _)) => Some(ws_stream.split()),
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            None
        }
    }
}

async fn send(write: &mut WsWrite, message: &ClientMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            println!("{} Failed to encode message: {}", "✗".red(), e);
            return false;
        }
    };
    write.send(Message::Text(text)).await.is_ok()
}

/// Next server message, or None on timeout/close
async fn next_message(read: &mut WsRead, wait: Duration) -> Option<ServerMessage> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str(&text) {
                Ok(message) => return Some(message),
                Err(_) => continue,
            },
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) | Err(_) => return None,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

/// Waits for the first message matching `pred`, skipping others
async fn wait_for<F>(read: &mut WsRead, wait: Duration, pred: F) -> Option<ServerMessage>
where
    F: Fn(&ServerMessage) -> bool,
{
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        let message = next_message(read, remaining).await?;
        if pred(&message) {
            return Some(message);
        }
    }
}

fn is_update(message: &ServerMessage, student_id: &str, event_type: EventType) -> bool {
    matches!(message, ServerMessage::MonitorUpdate(event)
        if event.student_id == student_id && event.event_type == event_type)
}

fn join(exam: &str, student_id: Option<&str>, name: Option<&str>) -> ClientMessage {
    ClientMessage::JoinExam {
        exam_id: exam.to_string(),
        student_id: student_id.map(str::to_string),
        student_name: name.map(str::to_string),
        picture: None,
    }
}

fn activity(exam: &str, student_id: &str, name: &str, kind: ActivityKind) -> ClientMessage {
    ClientMessage::StudentActivity {
        exam_id: exam.to_string(),
        student_id: student_id.to_string(),
        student_name: name.to_string(),
        picture: None,
        event_type: kind,
    }
}

fn print_server_message(message: &ServerMessage) {
    match message {
        ServerMessage::MonitorUpdate(event) => {
            let label = match event.event_type {
                EventType::Connected | EventType::FocusGained => event.event_type.to_string().green(),
                EventType::FocusLost => event.event_type.to_string().yellow(),
                EventType::Submitted => event.event_type.to_string().blue(),
                EventType::LeftExam | EventType::Disconnected => event.event_type.to_string().red(),
            };
            let score = match (event.score, event.total_questions) {
                (Some(score), Some(total)) => format!(" ({}/{})", score, total),
                _ => String::new(),
            };
            println!(
                "{} {} {} [{}]{}",
                "◀".green(),
                label,
                event.student_name.bold(),
                event.student_id,
                score
            );
        }
        ServerMessage::MonitorSnapshot { exam_id, students } => {
            println!("\n{} {}", "Snapshot for exam".bold(), exam_id.cyan());
            println!("{}", "─".repeat(60));
            for entry in students {
                println!(
                    "  {:<24} {:<12} {}",
                    entry.student_name,
                    entry.status.to_string(),
                    entry.student_id
                );
            }
            println!("{}", "─".repeat(60));
        }
        other => match serde_json::to_string(other) {
            Ok(text) => println!("{} {}", "◀".green(), text.bright_white()),
            Err(_) => println!("{} {:?}", "◀".green(), other),
        },
    }
}

async fn student_mode(server: &str, exam: &str, student_id: &str, name: Option<&str>) {
    let name = name.unwrap_or(student_id).to_string();
    println!("{}", "Joining exam as student...".cyan());
    println!("  Exam ID: {}", exam);
    println!("  Student ID: {}", student_id);

    let Some((mut write, mut read)) = connect(server).await else {
        return;
    };

    if !send(&mut write, &join(exam, Some(student_id), Some(&name))).await {
        println!("{} Failed to send join_exam", "✗".red());
        return;
    }
    println!(
        "{} Joined. Commands: {} {} {} {} {}",
        "✓".green(),
        "lost".cyan(),
        "gained".cyan(),
        "ready".cyan(),
        "leave".cyan(),
        "quit".cyan()
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
    let focus = Arc::new(Mutex::new(ActivityKind::FocusGained));

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if !send(&mut write, &message).await {
                break;
            }
        }
    });

    // Answers status_sync_request with the locally observed focus state
    let receive_task = {
        let tx = tx.clone();
        let focus = focus.clone();
        let exam = exam.to_string();
        let student_id = student_id.to_string();
        let name = name.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                let Message::Text(text) = msg else { continue };
                let Ok(message) = serde_json::from_str::<ServerMessage>(&text) else {
                    continue;
                };
                print_server_message(&message);
                if let ServerMessage::StatusSyncRequest { .. } = message {
                    let kind = *focus.lock().unwrap_or_else(|p| p.into_inner());
                    let _ = tx.send(activity(&exam, &student_id, &name, kind));
                }
            }
        })
    };

    loop {
        print!("{} ", "►".cyan());
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            break;
        }

        let message = match input.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "lost" | "gained" => {
                let kind = if input.trim() == "lost" {
                    ActivityKind::FocusLost
                } else {
                    ActivityKind::FocusGained
                };
                *focus.lock().unwrap_or_else(|p| p.into_inner()) = kind;
                activity(exam, student_id, &name, kind)
            }
            "ready" => ClientMessage::WebrtcReady {
                exam_id: exam.to_string(),
                student_id: student_id.to_string(),
                extra: Default::default(),
            },
            "leave" => {
                let _ = tx.send(ClientMessage::LeaveExam {
                    exam_id: exam.to_string(),
                });
                sleep(Duration::from_millis(200)).await;
                break;
            }
            other => {
                println!("{} Unknown command: {}", "✗".yellow(), other);
                continue;
            }
        };

        if tx.send(message).is_err() {
            println!("{} Connection lost", "✗".red());
            break;
        }
    }

    receive_task.abort();
    writer_task.abort();
}

async fn watch_exam(server: &str, exam: &str, proctor_id: &str, video: bool) {
    println!("{}", "Watching exam...".cyan());
    println!("  Exam ID: {}", exam);

    let Some((mut write, mut read)) = connect(server).await else {
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
    let mut peers = if video {
        let ice = fetch_ice_config(server).await.unwrap_or_default();
        match ProctorPeers::new(exam, proctor_id, &ice, tx.clone()) {
            Ok(peers) => Some(peers),
            Err(e) => {
                println!("{} Failed to set up WebRTC: {}", "✗".red(), e);
                return;
            }
        }
    } else {
        None
    };

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if !send(&mut write, &message).await {
                break;
            }
        }
    });

    if tx.send(join(exam, None, None)).is_err() {
        println!("{} Failed to send join_exam", "✗".red());
        return;
    }
    println!("Press {} to stop watching.", "Ctrl+C".bold());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frame = read.next() => {
                let Some(Ok(frame)) = frame else {
                    println!("{} Connection closed", "✗".yellow());
                    break;
                };
                let Message::Text(text) = frame else { continue };
                let Ok(message) = serde_json::from_str::<ServerMessage>(&text) else {
                    continue;
                };

                print_server_message(&message);
                if let Some(peers) = peers.as_mut() {
                    if let Err(e) = peers.handle(message).await {
                        println!("{} Peer error: {}", "✗".yellow(), e);
                    }
                }
            }
        }
    }

    if let Some(peers) = peers.as_mut() {
        peers.close_all().await;
    }
    writer_task.abort();
}

async fn submit(server: &str, exam: &str, student_id: &str, score: u32, total: u32) {
    let url = format!("http://{}/monitor/exams/{}/submissions", server, exam);
    let body = serde_json::json!({ "studentId": student_id, "score": score, "totalQuestions": total });

    match reqwest::Client::new().post(&url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => {
            println!("{} Submission recorded for {}", "✓".green(), student_id);
        }
        Ok(resp) => {
            println!("{} Submission rejected: {}", "✗".red(), resp.status());
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn request_sync(server: &str, exam: &str) {
    let Some((mut write, _read)) = connect(server).await else {
        return;
    };

    let sent = send(&mut write, &join(exam, None, None)).await
        && send(
            &mut write,
            &ClientMessage::RequestStatusSync {
                exam_id: exam.to_string(),
            },
        )
        .await;

    if sent {
        println!("{} Status sync requested for exam {}", "✓".green(), exam);
    } else {
        println!("{} Failed to send sync request", "✗".red());
    }
}

async fn show_activity(server: &str, exam: &str, student_id: &str) {
    let url = format!(
        "http://{}/monitor/exams/{}/students/{}/activity",
        server, exam, student_id
    );

    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            let Ok(body) = resp.json::<serde_json::Value>().await else {
                println!("{} Malformed response", "✗".red());
                return;
            };
            println!("{} {}", "Replayed status:".bold(), body["status"].as_str().unwrap_or("none"));
            for record in body["records"].as_array().into_iter().flatten() {
                println!(
                    "  {}  {}",
                    record["timestamp"].as_str().unwrap_or("?"),
                    record["eventType"].as_str().unwrap_or("?")
                );
            }
        }
        Ok(resp) => println!("{} Request failed: {}", "✗".red(), resp.status()),
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Basic WebSocket connection test", "connection".cyan());
    println!("  {} - Proctor join receives a snapshot", "snapshot".cyan());
    println!("  {} - Focus changes reach the proctor", "focus".cyan());
    println!("  {} - Quick reconnect never shows DISCONNECTED", "reconnect".cyan());
    println!("  {} - Submitted students stay submitted", "submitted".cyan());
    println!("  {} - Closing one of two tabs keeps the student online", "multi-tab".cyan());
    println!("  {} - Clean leave is reported at once", "leave".cyan());
    println!("  {} - webrtc_ready is relayed to the proctor", "relay".cyan());
    println!("\nScenarios use exam id 'cli-validation'; the exam does not need to exist.");
    println!("Example: monitor-cli validate --scenario focus");
}

const SCENARIOS: &[&str] = &[
    "connection",
    "snapshot",
    "focus",
    "reconnect",
    "submitted",
    "multi-tab",
    "leave",
    "relay",
];

async fn dispatch_scenario(server: &str, scenario: &str) -> Option<bool> {
    let result = match scenario {
        "connection" => validate_connection(server).await,
        "snapshot" => validate_snapshot(server).await,
        "focus" => validate_focus(server).await,
        "reconnect" => validate_reconnect(server).await,
        "submitted" => validate_submitted(server).await,
        "multi-tab" => validate_multi_tab(server).await,
        "leave" => validate_leave(server).await,
        "relay" => validate_relay(server).await,
        _ => return None,
    };
    Some(result)
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    match dispatch_scenario(server, scenario).await {
        Some(true) => println!("\n{} Scenario passed", "✓".green().bold()),
        Some(false) => println!("\n{} Scenario failed", "✗".red().bold()),
        None => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
        }
    }
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let mut passed = 0;
    let mut failed = 0;

    for scenario in SCENARIOS {
        println!("\n{} {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        if dispatch_scenario(server, scenario).await == Some(true) {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(300)).await;
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} Passed: {}", "✓".green(), passed.to_string().green());
    println!("  {} Failed: {}", "✗".red(), failed.to_string().red());
    println!("  Total: {}", passed + failed);

    if failed == 0 {
        println!("\n{}", "All validations passed!".green().bold());
    } else {
        println!("\n{}", "Some validations failed. Check output above.".yellow());
    }
}

const EXAM: &str = "cli-validation";
const WAIT: Duration = Duration::from_secs(3);

fn unique_student(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("{}-{:08x}", prefix, nanos)
}

/// Connects an observer and waits for its snapshot
async fn proctor(server: &str) -> Option<(WsWrite, WsRead)> {
    let (mut write, mut read) = connect(server).await?;
    if !send(&mut write, &join(EXAM, None, None)).await {
        return None;
    }
    wait_for(&mut read, WAIT, |m| matches!(m, ServerMessage::MonitorSnapshot { .. })).await?;
    Some((write, read))
}

async fn student(server: &str, student_id: &str) -> Option<(WsWrite, WsRead)> {
    let (mut write, read) = connect(server).await?;
    if !send(&mut write, &join(EXAM, Some(student_id), Some(student_id))).await {
        return None;
    }
    Some((write, read))
}

fn check(ok: bool, what: &str) -> bool {
    if ok {
        println!("{} {}", "✓".green(), what);
    } else {
        println!("{} {}", "✗".red(), what);
    }
    ok
}

async fn validate_connection(server: &str) -> bool {
    match connect_async(&ws_url(server)).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection successful", "✓".green());
            drop(ws_stream);
            true
        }
        Err(e) => {
            println!("{} Connection failed: {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_snapshot(server: &str) -> bool {
    check(proctor(server).await.is_some(), "Proctor received monitor_snapshot")
}

async fn validate_focus(server: &str) -> bool {
    let Some((_pw, mut pr)) = proctor(server).await else {
        return check(false, "Proctor joined");
    };
    let id = unique_student("focus");
    let Some((mut sw, _sr)) = student(server, &id).await else {
        return check(false, "Student joined");
    };

    let connected = wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::Connected)).await;
    if !check(connected.is_some(), "Proctor saw CONNECTED") {
        return false;
    }

    send(&mut sw, &activity(EXAM, &id, &id, ActivityKind::FocusLost)).await;
    let lost = wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::FocusLost)).await;
    check(lost.is_some(), "Proctor saw FOCUS_LOST")
}

async fn validate_reconnect(server: &str) -> bool {
    let Some((_pw, mut pr)) = proctor(server).await else {
        return check(false, "Proctor joined");
    };
    let id = unique_student("reconnect");
    let Some(first) = student(server, &id).await else {
        return check(false, "Student joined");
    };
    wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::Connected)).await;

    drop(first);
    sleep(Duration::from_millis(500)).await;
    let Some(_second) = student(server, &id).await else {
        return check(false, "Student reconnected");
    };

    let reconnected = wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::Connected)).await;
    let disconnected =
        wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::Disconnected)).await;

    check(reconnected.is_some(), "Proctor saw the reconnect")
        & check(disconnected.is_none(), "No DISCONNECTED inside the grace period")
}

async fn validate_submitted(server: &str) -> bool {
    let Some((_pw, mut pr)) = proctor(server).await else {
        return check(false, "Proctor joined");
    };
    let id = unique_student("submitted");
    let Some((mut sw, _sr)) = student(server, &id).await else {
        return check(false, "Student joined");
    };
    wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::Connected)).await;

    submit(server, EXAM, &id, 9, 10).await;
    let submitted = wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::Submitted)).await;
    if !check(submitted.is_some(), "Proctor saw SUBMITTED") {
        return false;
    }

    send(&mut sw, &activity(EXAM, &id, &id, ActivityKind::FocusLost)).await;
    let late = wait_for(&mut pr, WAIT, |m| {
        matches!(m, ServerMessage::MonitorUpdate(event) if event.student_id == id)
    })
    .await;
    check(late.is_none(), "Late activity after submission was dropped")
}

async fn validate_multi_tab(server: &str) -> bool {
    let Some((_pw, mut pr)) = proctor(server).await else {
        return check(false, "Proctor joined");
    };
    let id = unique_student("tabs");
    let Some(tab1) = student(server, &id).await else {
        return check(false, "First tab joined");
    };
    let Some(_tab2) = student(server, &id).await else {
        return check(false, "Second tab joined");
    };

    drop(tab1);
    let disconnected =
        wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::Disconnected)).await;
    check(disconnected.is_none(), "Closing one tab did not mark the student offline")
}

async fn validate_leave(server: &str) -> bool {
    let Some((_pw, mut pr)) = proctor(server).await else {
        return check(false, "Proctor joined");
    };
    let id = unique_student("leave");
    let Some((mut sw, _sr)) = student(server, &id).await else {
        return check(false, "Student joined");
    };
    wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::Connected)).await;

    send(
        &mut sw,
        &ClientMessage::LeaveExam {
            exam_id: EXAM.to_string(),
        },
    )
    .await;
    let disconnected =
        wait_for(&mut pr, WAIT, |m| is_update(m, &id, EventType::Disconnected)).await;
    check(disconnected.is_some(), "Proctor saw DISCONNECTED right after leave")
}

async fn validate_relay(server: &str) -> bool {
    let Some((_pw, mut pr)) = proctor(server).await else {
        return check(false, "Proctor joined");
    };
    let id = unique_student("relay");
    let Some((mut sw, _sr)) = student(server, &id).await else {
        return check(false, "Student joined");
    };

    send(
        &mut sw,
        &ClientMessage::WebrtcReady {
            exam_id: EXAM.to_string(),
            student_id: id.clone(),
            extra: Default::default(),
        },
    )
    .await;

    let ready = wait_for(&mut pr, WAIT, |m| {
        matches!(m, ServerMessage::WebrtcReady { student_id, .. } if *student_id == id)
    })
    .await;
    check(ready.is_some(), "Proctor received webrtc_ready")
}
