//! Minimal SMTP session driver shared by the relay services.
//!
//! Speaks just enough of the protocol for a client to hand over an
//! envelope: EHLO/HELO, MAIL FROM, RCPT TO, DATA, RSET, QUIT. Message
//! bodies are consumed and discarded; only the envelope is reported.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// An accepted message envelope.
#[derive(Debug, Default, Clone)]
pub struct Envelope {
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub data_lines: usize,
}

/// Extract the address from a `MAIL FROM:<addr>` / `RCPT TO:<addr>`
/// argument. Falls back to the raw trimmed argument when unbracketed.
pub fn extract_angle_addr(arg: &str) -> Option<String> {
    let arg = arg.trim();
    let addr = match (arg.find('<'), arg.rfind('>')) {
        (Some(open), Some(close)) if open < close => &arg[open + 1..close],
        _ => arg,
    };
    let addr = addr.trim();
    if addr.is_empty() {
        None
    } else {
        Some(addr.to_string())
    }
}

/// Drive one SMTP session, invoking `on_message` for each completed
/// envelope. Returns when the client quits or the connection drops.
pub async fn run_session<F>(
    stream: TcpStream,
    banner: &str,
    mut on_message: F,
) -> io::Result<()>
where
    F: FnMut(&Envelope),
{
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(format!("220 {} ESMTP\r\n", banner).as_bytes())
        .await?;

    let mut envelope = Envelope::default();
    let mut in_data = false;

    while let Some(line) = lines.next_line().await? {
        if in_data {
            if line == "." {
                in_data = false;
                on_message(&envelope);
                envelope = Envelope::default();
                write_half.write_all(b"250 OK\r\n").await?;
            } else {
                envelope.data_lines += 1;
            }
            continue;
        }

        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg),
            None => (line.to_ascii_uppercase(), ""),
        };

        match verb.as_str() {
            "HELO" | "EHLO" => write_half.write_all(b"250 OK\r\n").await?,
            "MAIL" => {
                envelope.sender = extract_angle_addr(arg.trim_start_matches("FROM:").trim_start_matches("from:"));
                write_half.write_all(b"250 OK\r\n").await?;
            }
            "RCPT" => {
                if let Some(addr) = extract_angle_addr(arg.trim_start_matches("TO:").trim_start_matches("to:")) {
                    envelope.recipients.push(addr);
                    write_half.write_all(b"250 OK\r\n").await?;
                } else {
                    write_half.write_all(b"501 Syntax error\r\n").await?;
                }
            }
            "DATA" => {
                in_data = true;
                write_half
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;
            }
            "RSET" => {
                envelope = Envelope::default();
                write_half.write_all(b"250 OK\r\n").await?;
            }
            "QUIT" => {
                write_half.write_all(b"221 Bye\r\n").await?;
                break;
            }
            _ => write_half.write_all(b"502 Command not implemented\r\n").await?,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_addresses_are_extracted() {
        assert_eq!(
            extract_angle_addr("<user@example.com>"),
            Some("user@example.com".to_string())
        );
        assert_eq!(
            extract_angle_addr(" user@example.com "),
            Some("user@example.com".to_string())
        );
        assert_eq!(extract_angle_addr("<>"), None);
        assert_eq!(extract_angle_addr(""), None);
    }
}
