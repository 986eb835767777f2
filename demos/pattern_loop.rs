//! Loops a hand-authored drum bar and swaps the notes live after a few
//! bars, the way the hot-swap path is meant to be used.
//!
//! Connects to the first MIDI output port it finds (on unix, falls back to
//! creating a virtual port you can patch in QJackCtl or with aconnect).

use barline::{spawn_transport, MidiKey, MidiSink, Note, Playback, Tempo, TransportUpdate};

fn kick(start: f64) -> Note<MidiKey> {
    Note::new(MidiKey { channel: 9, pitch: 36 }, start, 0.25, 1.0)
}

fn hat(start: f64) -> Note<MidiKey> {
    Note::new(MidiKey { channel: 9, pitch: 42 }, start, 0.1, 0.5)
}

fn open_sink() -> MidiSink {
    match MidiSink::connect("pattern-loop") {
        Ok(sink) => sink,
        Err(_) => {
            #[cfg(unix)]
            return MidiSink::virtual_port("pattern-loop", "loop-out").expect("no MIDI output");
            #[cfg(not(unix))]
            panic!("no MIDI output");
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let transport = spawn_transport(open_sink());

    // Four-on-the-floor.
    let bar: Vec<_> = (0..4).map(|beat| kick(beat as f64)).collect();
    transport.play(Playback {
        tempo: Tempo::new(120.0).expect("valid tempo"),
        notes: bar,
        loop_beats: Some(4.0),
    });
    println!("Looping kicks at 120 bpm; hats join after four bars.");

    let mut swapped = false;
    for update in transport.update_rx.iter() {
        match update {
            TransportUpdate::BarCompleted { iteration } => {
                println!("bar {} done", iteration + 1);
                if iteration >= 3 && !swapped {
                    let mut busier: Vec<_> = (0..4).map(|beat| kick(beat as f64)).collect();
                    busier.extend((0..8).map(|eighth| hat(eighth as f64 * 0.5)));
                    transport.set_notes(busier);
                    swapped = true;
                }
                if iteration >= 11 {
                    transport.stop();
                }
            }
            TransportUpdate::Stopped => break,
            _ => {}
        }
    }
}
