//! Line-oriented REPL over stdin

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use concord_crdt::{Reply, Request};
use concord_runtime::ServiceHandle;

const HELP: &str = "\
Commands:
  add <element>     add an element
  remove <element>  remove every copy of an element seen so far
  read              print the current set
  tags <element>    print the live add tags of an element
  digest            print the state digest
  peers             list linked neighbors
  exit              stop the node";

enum Command {
    Request(Request),
    Tags(String),
    Digest,
    Peers,
    Help,
    Exit,
}

fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let element = |what: &str| {
        if rest.is_empty() {
            Err(format!("usage: {} <element>", what))
        } else {
            Ok(rest.to_string())
        }
    };

    match word {
        "add" => Ok(Command::Request(Request::Add(element("add")?))),
        "remove" => Ok(Command::Request(Request::Remove(element("remove")?))),
        "read" => Ok(Command::Request(Request::Read)),
        "tags" => Ok(Command::Tags(element("tags")?)),
        "digest" => Ok(Command::Digest),
        "peers" => Ok(Command::Peers),
        "help" | "?" => Ok(Command::Help),
        "exit" | "quit" => Ok(Command::Exit),
        other => Err(format!("unknown command {:?}, try `help`", other)),
    }
}

fn show(reply: Reply) -> String {
    match reply {
        Reply::Add { element } => format!("added {}", element),
        Reply::Remove { element } => format!("removed {}", element),
        Reply::Read { elements } => {
            let listed: Vec<String> = elements.into_iter().collect();
            format!("{{{}}}", listed.join(", "))
        }
    }
}

pub async fn run(mut handle: ServiceHandle) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let output = match parse(&line) {
            Err(message) => message,
            Ok(Command::Help) => HELP.to_string(),
            Ok(Command::Exit) => break,
            Ok(Command::Request(request)) => {
                if handle.requests.send(request).await.is_err() {
                    break;
                }
                match handle.replies.recv().await {
                    Some(reply) => show(reply),
                    None => break,
                }
            }
            Ok(Command::Tags(element)) => match handle.tags(&element).await {
                Some(tags) if tags.is_empty() => format!("{} is not present", element),
                Some(tags) => tags
                    .iter()
                    .map(|tag| tag.to_string())
                    .collect::<Vec<_>>()
                    .join("\n"),
                None => break,
            },
            Ok(Command::Digest) => match handle.digest().await {
                Some(digest) => digest,
                None => break,
            },
            Ok(Command::Peers) => match handle.neighbors().await {
                Some(peers) if peers.is_empty() => "no neighbors linked".to_string(),
                Some(peers) => peers
                    .iter()
                    .map(|peer| peer.to_string())
                    .collect::<Vec<_>>()
                    .join("\n"),
                None => break,
            },
        };
        println!("{}", output);
    }
    Ok(())
}
