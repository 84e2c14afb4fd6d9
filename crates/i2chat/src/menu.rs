//! Interactive operation menu used when no subcommand is given

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::Operation;

const OPERATIONS: [&str; 4] = [
    "1. CREATE SESSION",
    "2. SHOW PUBLIC ADDRESS",
    "3. ACCEPT INCOMING STREAM",
    "4. CONNECT TO A STREAM",
];

/// Print the menu and read the chosen operation with its parameters.
pub async fn choose<R, W>(input: &mut R, output: &mut W) -> Result<Operation>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output
        .write_all(b"Choose from the following operations:\n")
        .await?;
    for operation in OPERATIONS {
        output.write_all(format!("{}\n", operation).as_bytes()).await?;
    }

    let answer = read_answer(input).await?;
    let choice: u32 = answer
        .parse()
        .with_context(|| format!("Enter a valid number, got {:?}", answer))?;

    Ok(match choice {
        1 => Operation::CreateSession {
            session_id: prompt(input, output, "Enter the session id to create: ").await?,
        },
        2 => Operation::Address,
        3 => Operation::Accept {
            session_id: prompt(input, output, "Enter the session id to accept on: ").await?,
        },
        4 => {
            let session_id = prompt(input, output, "Enter the session id to connect from: ").await?;
            let destination =
                prompt(input, output, "Enter the destination to connect to: ").await?;
            Operation::Connect {
                session_id,
                destination,
            }
        }
        other => bail!("{} is an invalid choice", other),
    })
}

async fn prompt<R, W>(input: &mut R, output: &mut W, question: &str) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(question.as_bytes()).await?;
    output.flush().await?;

    let answer = read_answer(input).await?;
    if answer.is_empty() {
        bail!("No value entered");
    }
    Ok(answer)
}

async fn read_answer<R>(input: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        bail!("Input closed");
    }
    Ok(line.trim().to_string())
}
