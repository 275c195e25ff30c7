//! Chat interactivo de consola.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::error;

use crate::chat::ChatEngine;
use crate::errors::RagError;
use crate::session::{ConversationSession, ResetPolicy};

const SEPARATOR: &str = "------------------------------------------------------------";

const HELP: &str = "
==================================================
📋 EXEMPLOS DE PERGUNTAS
==================================================

🎯 SOBRE OBJEÇÕES DE VENDAS:
   • 'E se não funcionar comigo?'
   • 'Está muito caro para um curso online'
   • 'Não tenho tempo para fazer o curso'
   • 'Como sei se o conteúdo é bom?'
   • 'E se não conseguir aprender?'

☕ SOBRE O PRODUTO 'MENOS CAFÉ MAIS CHÁ':
   • 'Como funciona o método de 21 dias?'
   • 'Quais são os benefícios do chá?'
   • 'Como preparar o chá corretamente?'
   • 'Quais chás são recomendados?'
   • 'E se eu não conseguir largar o café?'

🛒 SOBRE CHECKOUT:
   • 'E se não chegar?'
   • 'Como sei que é original?'
   • 'Frete muito caro'
   • 'Não tenho limite no cartão'
==================================================";

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Exit,
    Clear,
    Help,
    Empty,
    Question(&'a str),
}

pub fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    match line.to_lowercase().as_str() {
        "" => Command::Empty,
        "exit" | "quit" | "sair" => Command::Exit,
        "clear" | "limpar" => Command::Clear,
        "help" | "ajuda" => Command::Help,
        _ => Command::Question(line),
    }
}

/// Lee preguntas de `input` hasta `sair` o fin de entrada. Un error al
/// generar se muestra en línea y el bucle continúa.
pub async fn run_chat_loop<R, W>(
    engine: &ChatEngine,
    input: R,
    mut output: W,
) -> Result<(), RagError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut session = ConversationSession::new(ResetPolicy::Empty);
    let mut lines = input.lines();

    writeln!(output, "\n{}", "=".repeat(60))?;
    writeln!(output, "🎯 CHAT DE VENDAS - MENOS CAFÉ MAIS CHÁ")?;
    writeln!(output, "{}", "=".repeat(60))?;
    writeln!(output, "💡 Dicas de uso:")?;
    writeln!(output, "   • Faça perguntas sobre objeções de vendas")?;
    writeln!(output, "   • Pergunte sobre o produto 'Menos Café Mais Chá'")?;
    writeln!(output, "   • Digite 'sair' para encerrar")?;
    writeln!(output, "   • Digite 'limpar' para limpar o histórico")?;
    writeln!(output, "   • Digite 'ajuda' para ver exemplos de perguntas")?;
    writeln!(output, "{SEPARATOR}")?;

    loop {
        write!(output, "\n👤 Você: ")?;
        output.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(output, "\n\n👋 Chat encerrado. Até logo!")?;
            break;
        };

        match parse_command(&line) {
            Command::Exit => {
                writeln!(output, "\n Obrigado por usar o chat! Até logo!")?;
                break;
            }
            Command::Clear if session.is_empty() => {
                writeln!(output, "\n O histórico já está vazio.")?;
            }
            Command::Clear => {
                let dropped = session.len();
                session.clear();
                writeln!(output, "\n Histórico da conversa limpo! ({dropped} mensagens)")?;
            }
            Command::Help => writeln!(output, "{HELP}")?,
            Command::Empty => writeln!(output, "Por favor, digite uma pergunta.")?,
            Command::Question(question) => {
                writeln!(output, "\n⏳ Processando sua pergunta...")?;
                match engine.respond(&mut session, question).await {
                    Ok(answer) => writeln!(output, "\n🤖 Assistente: {answer}")?,
                    Err(err) => {
                        error!("Erro ao gerar resposta: {err}");
                        writeln!(output, "\n❌ Erro ao gerar resposta: {err}")?;
                    }
                }
                writeln!(output, "\n{SEPARATOR}")?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::{engine_with, RecordingChat};

    async fn run(engine: &ChatEngine, input: &str) -> String {
        let mut output = Vec::new();
        run_chat_loop(engine, input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn commands_are_case_insensitive_and_trimmed() {
        assert_eq!(parse_command("SAIR"), Command::Exit);
        assert_eq!(parse_command(" quit "), Command::Exit);
        assert_eq!(parse_command("Limpar"), Command::Clear);
        assert_eq!(parse_command("help"), Command::Help);
        assert_eq!(parse_command("   "), Command::Empty);
        assert_eq!(
            parse_command("  Frete muito caro "),
            Command::Question("Frete muito caro")
        );
    }

    #[tokio::test]
    async fn loop_handles_commands_and_questions() {
        let chat = Arc::new(RecordingChat::default());
        let engine = engine_with(&["garantia de 7 dias"], chat.clone()).await;

        let output = run(
            &engine,
            "ajuda\n\nqual a garantia?\nlimpar\nqual a garantia?\nsair\nnão lida\n",
        )
        .await;

        assert!(output.contains("EXEMPLOS DE PERGUNTAS"));
        assert!(output.contains("Por favor, digite uma pergunta."));
        assert!(output.contains("🤖 Assistente: Resposta para: qual a garantia?"));
        assert!(output.contains("Histórico da conversa limpo! (2 mensagens)"));
        assert!(output.contains("Obrigado por usar o chat!"));

        let requests = chat.requests();
        assert_eq!(requests.len(), 2);
        // Tras `limpar` la segunda pregunta va sin historial.
        assert_eq!(requests[1].messages.len(), 2);
    }

    #[tokio::test]
    async fn clearing_an_empty_history_says_so() {
        let engine = engine_with(&[], Arc::new(RecordingChat::default())).await;

        let output = run(&engine, "limpar\n").await;

        assert!(output.contains("O histórico já está vazio."));
        assert!(!output.contains("Histórico da conversa limpo!"));
    }

    #[tokio::test]
    async fn generation_errors_are_shown_inline() {
        let engine = engine_with(
            &["garantia de 7 dias"],
            Arc::new(RecordingChat::failing("quota exceeded")),
        )
        .await;

        let output = run(&engine, "qual a garantia?\n").await;

        assert!(output.contains("❌ Erro ao gerar resposta:"));
        assert!(output.contains("quota exceeded"));
        assert!(output.contains("Chat encerrado"));
    }
}
