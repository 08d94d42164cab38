use std::env;
use std::error::Error;
use std::path::PathBuf;

use serde_json::json;

use onward::client::{HttpTransport, SessionStore};

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().collect::<Vec<String>>();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let command = args[1].clone();
    let command_args = args.split_off(2);

    match command.as_str() {
        "register" => register(&command_args),
        "login" => login(&command_args),
        "me" => me(),
        "stats" => stats(),
        "tasks" => tasks(&command_args),
        "complete" => complete(&command_args),
        "checkin" => checkin(&command_args),
        "recovery" => recovery(&command_args),
        "logout" => logout(),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!(
        "onward commands:\n\
         \n\
         register <email> <username> <password>\n\
         login <email> <password>\n\
         me\n\
         stats\n\
         tasks [--category <name>] [--daily]\n\
         complete <task_id> [--date YYYY-MM-DD]\n\
         checkin <mood 1-10> [notes...]\n\
         recovery start <addiction_type>\n\
         recovery active\n\
         recovery relapse <addiction_type> [notes...]\n\
         logout\n\
         \n\
         Environment:\n\
         ONWARD_HOME defaults to .onward\n\
         ONWARD_API_URL defaults to http://127.0.0.1:8080"
    );
}

fn data_dir() -> PathBuf {
    env::var("ONWARD_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".onward"))
}

fn api_url() -> String {
    env::var("ONWARD_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
}

fn open_session() -> SessionStore {
    SessionStore::new(
        data_dir().join("session.json"),
        Box::new(HttpTransport::new(api_url())),
    )
}

fn register(args: &[String]) -> Result<(), Box<dyn Error>> {
    let [email, username, password] = args else {
        return Err("usage: register <email> <username> <password>".into());
    };
    let mut session = open_session();
    let user = session.register(email, username, password)?;
    println!("registered and logged in as {} ({})", user.username, user.email);
    Ok(())
}

fn login(args: &[String]) -> Result<(), Box<dyn Error>> {
    let [email, password] = args else {
        return Err("usage: login <email> <password>".into());
    };
    let mut session = open_session();
    let user = session.login(email, password)?;
    println!("logged in as {} ({})", user.username, user.email);
    Ok(())
}

fn me() -> Result<(), Box<dyn Error>> {
    let mut session = open_session();
    let me = session.me()?;
    println!(
        "{} ({}) - {} points, level {}",
        me["username"].as_str().unwrap_or("?"),
        me["email"].as_str().unwrap_or("?"),
        me["points"],
        me["level"]
    );
    Ok(())
}

fn stats() -> Result<(), Box<dyn Error>> {
    let mut session = open_session();
    let stats = session.fetch_stats()?;
    println!("points:          {}", stats["totalPoints"]);
    println!("level:           {}", stats["level"]);
    println!("to next level:   {}", stats["pointsToNextLevel"]);
    println!("tasks completed: {}", stats["tasksCompleted"]);
    println!("  today:         {}", stats["tasksCompletedToday"]);
    println!("check-ins:       {}", stats["checkins"]);
    println!("current streak:  {} days", stats["currentStreakDays"]);
    println!("best streak:     {} days", stats["bestStreakDays"]);
    Ok(())
}

fn tasks(args: &[String]) -> Result<(), Box<dyn Error>> {
    let mut category: Option<String> = None;
    let mut daily = false;
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--category" => {
                index += 1;
                category = Some(
                    args.get(index)
                        .ok_or("--category requires a value")?
                        .clone(),
                );
            }
            "--daily" => daily = true,
            other => return Err(format!("unknown option: {other}").into()),
        }
        index += 1;
    }

    let mut session = open_session();
    if daily {
        let response = session.authed_get("/api/tasks/daily")?;
        let tasks = response["tasks"].as_array().cloned().unwrap_or_default();
        println!("daily tasks for {}:", response["date"].as_str().unwrap_or("?"));
        for task in tasks {
            let mark = if task["completed"].as_bool().unwrap_or(false) {
                "x"
            } else {
                " "
            };
            println!(
                "[{}] #{} {} ({} pts)",
                mark, task["id"], task["title"], task["points"]
            );
        }
        return Ok(());
    }

    let path = match category {
        Some(category) => format!("/api/tasks?category={category}"),
        None => "/api/tasks".to_string(),
    };
    let tasks = session.public_get(&path)?;
    for task in tasks.as_array().cloned().unwrap_or_default() {
        println!(
            "#{} {} [{}] ({} pts)",
            task["id"], task["title"], task["category"], task["points"]
        );
    }
    Ok(())
}

fn complete(args: &[String]) -> Result<(), Box<dyn Error>> {
    if args.is_empty() {
        return Err("usage: complete <task_id> [--date YYYY-MM-DD]".into());
    }
    let task_id: i64 = args[0].parse().map_err(|_| "task_id must be a number")?;
    let mut date: Option<String> = None;
    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--date" => {
                index += 1;
                date = Some(args.get(index).ok_or("--date requires a value")?.clone());
            }
            other => return Err(format!("unknown option: {other}").into()),
        }
        index += 1;
    }

    let mut body = json!({ "taskId": task_id });
    if let Some(date) = date {
        body["completionDate"] = json!(date);
    }
    let mut session = open_session();
    let outcome = session.authed_post("/api/tasks/complete", &body)?;
    println!(
        "+{} points (total {}, level {})",
        outcome["pointsEarned"], outcome["totalPoints"], outcome["level"]
    );
    if outcome["levelUp"].as_bool().unwrap_or(false) {
        println!("level up!");
    }
    Ok(())
}

fn checkin(args: &[String]) -> Result<(), Box<dyn Error>> {
    if args.is_empty() {
        return Err("usage: checkin <mood 1-10> [notes...]".into());
    }
    let mood: i64 = args[0].parse().map_err(|_| "mood must be a number")?;
    let notes = if args.len() > 1 {
        Some(args[1..].join(" "))
    } else {
        None
    };

    let mut body = json!({ "mood": mood });
    if let Some(notes) = notes {
        body["notes"] = json!(notes);
    }
    let mut session = open_session();
    let checkin = session.authed_post("/api/mood/checkin", &body)?;
    let verb = if checkin["created"].as_bool().unwrap_or(false) {
        "recorded"
    } else {
        "updated"
    };
    println!(
        "{} check-in for {}: mood {}",
        verb,
        checkin["date"].as_str().unwrap_or("?"),
        checkin["mood"]
    );
    Ok(())
}

fn recovery(args: &[String]) -> Result<(), Box<dyn Error>> {
    let usage = "usage: recovery start <type> | recovery active | recovery relapse <type> [notes...]";
    let Some(subcommand) = args.first() else {
        return Err(usage.into());
    };
    let mut session = open_session();

    match subcommand.as_str() {
        "start" => {
            let addiction_type = args.get(1).ok_or(usage)?;
            let body = json!({ "addictionType": addiction_type });
            let session_row = session.authed_post("/api/recovery/start", &body)?;
            println!(
                "started {} recovery (session #{})",
                session_row["addictionType"].as_str().unwrap_or("?"),
                session_row["id"]
            );
        }
        "active" => {
            let sessions = session.authed_get("/api/recovery/active")?;
            let sessions = sessions.as_array().cloned().unwrap_or_default();
            if sessions.is_empty() {
                println!("no active recovery sessions");
            }
            for row in sessions {
                println!(
                    "{}: {} days",
                    row["addictionType"].as_str().unwrap_or("?"),
                    row["streakDays"]
                );
            }
        }
        "relapse" => {
            let addiction_type = args.get(1).ok_or(usage)?;
            let mut body = json!({ "addictionType": addiction_type });
            if args.len() > 2 {
                body["notes"] = json!(args[2..].join(" "));
            }
            let row = session.authed_post("/api/recovery/relapse", &body)?;
            println!(
                "ended {} session after {} days; starting over is allowed any time",
                row["addictionType"].as_str().unwrap_or("?"),
                row["streakDays"]
            );
        }
        _ => return Err(usage.into()),
    }
    Ok(())
}

fn logout() -> Result<(), Box<dyn Error>> {
    let mut session = open_session();
    session.logout()?;
    println!("logged out");
    Ok(())
}
