//! Just enough of an SMTP client to drive the relay from tests.

use std::net::SocketAddr;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

pub struct SmtpTestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub greeting: Response,
}

impl SmtpTestClient {
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let (read, writer) = TcpStream::connect(addr).await?.into_split();
        let mut reader = BufReader::new(read);
        let greeting = read_response(&mut reader).await?;

        Ok(Self {
            reader,
            writer,
            greeting,
        })
    }

    pub async fn command(&mut self, line: &str) -> anyhow::Result<Response> {
        self.writer.write_all(format!("{line}\r\n").as_bytes()).await?;
        read_response(&mut self.reader).await
    }

    /// Send `content` after a `354`, dot-stuffing lines as needed.
    pub async fn data(&mut self, content: &str) -> anyhow::Result<Response> {
        let reply = self.command("DATA").await?;
        if reply.code != 354 {
            return Ok(reply);
        }

        let mut payload = String::new();
        for line in content.split_inclusive("\r\n") {
            if line.starts_with('.') {
                payload.push('.');
            }
            payload.push_str(line);
        }
        if !payload.ends_with("\r\n") {
            payload.push_str("\r\n");
        }
        payload.push_str(".\r\n");

        self.writer.write_all(payload.as_bytes()).await?;
        read_response(&mut self.reader).await
    }

    /// EHLO, MAIL, RCPT and DATA in one go. Returns the first reply that is not
    /// a success, or the reply to the message content.
    pub async fn send_message(
        &mut self,
        helo: &str,
        from: &str,
        to: &[&str],
        content: &str,
    ) -> anyhow::Result<Response> {
        let reply = self.command(&format!("EHLO {helo}")).await?;
        if reply.code != 250 {
            return Ok(reply);
        }

        let reply = self.command(&format!("MAIL FROM:<{from}>")).await?;
        if reply.code != 250 {
            return Ok(reply);
        }

        for recipient in to {
            let reply = self.command(&format!("RCPT TO:<{recipient}>")).await?;
            if reply.code != 250 {
                return Ok(reply);
            }
        }

        self.data(content).await
    }

    pub async fn quit(mut self) -> anyhow::Result<Response> {
        self.command("QUIT").await
    }
}

async fn read_response(reader: &mut BufReader<OwnedReadHalf>) -> anyhow::Result<Response> {
    let mut lines = Vec::new();

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            anyhow::bail!("Connection closed after {} reply lines", lines.len());
        }

        let line = line.trim_end();
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| anyhow::anyhow!("Malformed reply line: {line}"))?;
        let last = line.as_bytes().get(3) != Some(&b'-');
        lines.push(line.get(4..).unwrap_or_default().to_string());

        if last {
            return Ok(Response { code, lines });
        }
    }
}
