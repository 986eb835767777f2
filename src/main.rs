use std::path::PathBuf;

use barline::{spawn_transport, MidiScore, MidiSink, Pattern, Playback, Tempo, TransportUpdate};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(
        args.next()
            .ok_or("usage: barline <file.mid|file.ron> [bpm]")?,
    );
    let bpm: Option<f64> = args.next().map(|s| s.parse()).transpose()?;

    let sink = MidiSink::connect("barline")?;
    let transport = spawn_transport(sink);

    if path.extension().and_then(|e| e.to_str()) == Some("ron") {
        let pattern = Pattern::load(&path)?;
        let tempo = Tempo::new(bpm.unwrap_or(120.0))?;
        transport.play(Playback {
            tempo,
            notes: pattern.to_notes(),
            loop_beats: Some(pattern.beats_per_bar),
        });

        println!("Looping {}. Press Enter to stop.", path.display());
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        transport.stop();
    } else {
        let score = MidiScore::load(&path)?;
        let tempo = Tempo::new(bpm.or(score.tempo_bpm).unwrap_or(120.0))?;
        println!(
            "Playing {} ({} notes, {:.1} beats at {} bpm)",
            path.display(),
            score.notes.len(),
            score.duration_beats,
            tempo.bpm(),
        );
        transport.play(Playback {
            tempo,
            notes: score.notes,
            loop_beats: None,
        });

        for update in transport.update_rx.iter() {
            match update {
                TransportUpdate::Finished => break,
                TransportUpdate::Error { message } => {
                    eprintln!("playback error: {message}");
                    break;
                }
                _ => {}
            }
        }
    }

    Ok(())
}
