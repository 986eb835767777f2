use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use ringbuf::{
    traits::{Consumer, Split},
    HeapCons, HeapRb,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::events::{Action, ScheduledAction};
use crate::sink::Sink;
use crate::timing::{schedule_notes, ActionProducer, Note, Tempo};

const ACTION_BUFFER_CAPACITY: usize = 4096;

/// Sleep granularity while waiting on a fire time, so stop stays responsive.
const WAIT_SLICE: Duration = Duration::from_millis(2);

/// Poll interval for an idle dispatch queue in loop mode.
const IDLE_POLL: Duration = Duration::from_millis(1);

/// One playback request: what to play, how fast, and whether to loop it.
#[derive(Debug, Clone)]
pub struct Playback<P> {
    pub tempo: Tempo,
    pub notes: Vec<Note<P>>,
    /// Bar length in beats; when set, the notes repeat at this interval
    /// until stopped.
    pub loop_beats: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum TransportCommand<P> {
    Play(Playback<P>),
    Stop,
}

#[derive(Debug, Clone)]
pub enum TransportUpdate {
    Started,
    BarCompleted { iteration: u64 },
    /// A non-looping playback ran off the end of its schedule.
    Finished,
    Stopped,
    Error { message: String },
}

pub struct TransportHandle<P> {
    pub command_tx: Sender<TransportCommand<P>>,
    pub update_rx: Receiver<TransportUpdate>,
    live_notes: Arc<ArcSwap<Vec<Note<P>>>>,
    stopped: Arc<AtomicBool>,
}

impl<P> TransportHandle<P> {
    pub fn play(&self, playback: Playback<P>) {
        let _ = self.command_tx.send(TransportCommand::Play(playback));
    }

    /// Halts playback. The stop flag is raised immediately, so no further
    /// activate or deactivate fires; already-sounding notes are not
    /// retracted.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(TransportCommand::Stop);
    }

    /// Replaces the looped notes. Picked up when the next bar is scheduled,
    /// one bar ahead of where playback currently is.
    pub fn set_notes(&self, notes: Vec<Note<P>>) {
        self.live_notes.store(Arc::new(notes));
    }
}

pub fn spawn_transport<S: Sink>(sink: S) -> TransportHandle<S::Payload> {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();
    let live_notes = Arc::new(ArcSwap::from_pointee(Vec::new()));
    let stopped = Arc::new(AtomicBool::new(false));

    let sink = Arc::new(sink);
    let thread_notes = live_notes.clone();
    let thread_stopped = stopped.clone();
    thread::spawn(move || {
        transport_thread(command_rx, update_tx, sink, thread_notes, thread_stopped);
    });

    TransportHandle {
        command_tx,
        update_rx,
        live_notes,
        stopped,
    }
}

struct ActivePlayback<P> {
    producer: ActionProducer<P>,
    start: Instant,
    tempo: Tempo,
    loop_beats: Option<f64>,
    /// Index of the next bar boundary to act on (looping only).
    next_boundary: u64,
    sealed: Arc<AtomicBool>,
    dispatcher: JoinHandle<()>,
}

fn transport_thread<S: Sink>(
    command_rx: Receiver<TransportCommand<S::Payload>>,
    update_tx: Sender<TransportUpdate>,
    sink: Arc<S>,
    live_notes: Arc<ArcSwap<Vec<Note<S::Payload>>>>,
    stopped: Arc<AtomicBool>,
) {
    let mut active: Option<ActivePlayback<S::Payload>> = None;

    loop {
        let command = match active.as_ref().and_then(next_boundary_at) {
            Some(boundary) => {
                let timeout = boundary.saturating_duration_since(Instant::now());
                match command_rx.recv_timeout(timeout) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match command_rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            None => {
                if let Some(playback) = active.as_mut() {
                    schedule_next_bar(playback, &live_notes, &update_tx);
                }
            }
            Some(TransportCommand::Play(playback)) => {
                stop_active(&mut active, &stopped);
                active = start_playback(playback, &sink, &live_notes, &stopped, &update_tx);
            }
            Some(TransportCommand::Stop) => {
                stop_active(&mut active, &stopped);
                let _ = update_tx.send(TransportUpdate::Stopped);
            }
        }
    }

    // Handle dropped: tear everything down.
    stop_active(&mut active, &stopped);
}

fn next_boundary_at<P>(playback: &ActivePlayback<P>) -> Option<Instant> {
    let loop_beats = playback.loop_beats?;
    let offset = playback
        .tempo
        .beats_to_duration(loop_beats * playback.next_boundary as f64);
    Some(playback.start + offset)
}

fn start_playback<S: Sink>(
    playback: Playback<S::Payload>,
    sink: &Arc<S>,
    live_notes: &Arc<ArcSwap<Vec<Note<S::Payload>>>>,
    stopped: &Arc<AtomicBool>,
    update_tx: &Sender<TransportUpdate>,
) -> Option<ActivePlayback<S::Payload>> {
    let loop_beats = playback.loop_beats.filter(|beats| {
        let valid = beats.is_finite() && *beats > 0.0;
        if !valid {
            warn!(loop_beats = *beats, "ignoring invalid loop length");
        }
        valid
    });

    live_notes.store(Arc::new(playback.notes.clone()));
    stopped.store(false, Ordering::SeqCst);

    let sealed = Arc::new(AtomicBool::new(false));
    let rb = HeapRb::new(ACTION_BUFFER_CAPACITY);
    let (mut producer, consumer) = rb.split();

    let start = Instant::now();
    let mut result = schedule_notes(
        &playback.notes,
        playback.tempo,
        loop_beats,
        Duration::ZERO,
        &mut producer,
    );

    // Loop mode stays one bar ahead so downbeat notes are queued early.
    if loop_beats.is_some() && result.is_ok() {
        result = schedule_notes(
            &playback.notes,
            playback.tempo,
            loop_beats,
            playback.tempo.beats_to_duration(loop_beats.unwrap_or(0.0)),
            &mut producer,
        );
    }
    if let Err(e) = result {
        let _ = update_tx.send(TransportUpdate::Error {
            message: format!("failed to schedule playback: {e}"),
        });
        return None;
    }

    if loop_beats.is_none() {
        sealed.store(true, Ordering::SeqCst);
    }

    let dispatcher = {
        let sink = sink.clone();
        let stopped = stopped.clone();
        let sealed = sealed.clone();
        let update_tx = update_tx.clone();
        thread::spawn(move || dispatch_thread(consumer, sink, start, stopped, sealed, update_tx))
    };

    debug!(
        notes = playback.notes.len(),
        bpm = playback.tempo.bpm(),
        looping = loop_beats.is_some(),
        "playback started"
    );
    let _ = update_tx.send(TransportUpdate::Started);

    Some(ActivePlayback {
        producer,
        start,
        tempo: playback.tempo,
        loop_beats,
        next_boundary: 1,
        sealed,
        dispatcher,
    })
}

/// Runs at bar boundary `k`: reports the bar that just ended and queues
/// iteration `k + 1`, reading whatever notes are currently live.
fn schedule_next_bar<P: Clone>(
    playback: &mut ActivePlayback<P>,
    live_notes: &Arc<ArcSwap<Vec<Note<P>>>>,
    update_tx: &Sender<TransportUpdate>,
) {
    let Some(loop_beats) = playback.loop_beats else {
        return;
    };
    let boundary = playback.next_boundary;
    playback.next_boundary += 1;

    let notes = live_notes.load_full();
    let offset = playback
        .tempo
        .beats_to_duration(loop_beats * (boundary + 1) as f64);
    if let Err(e) = schedule_notes(
        &notes,
        playback.tempo,
        Some(loop_beats),
        offset,
        &mut playback.producer,
    ) {
        warn!("dropping one loop iteration: {e}");
        let _ = update_tx.send(TransportUpdate::Error {
            message: format!("failed to schedule loop iteration: {e}"),
        });
    }

    let _ = update_tx.send(TransportUpdate::BarCompleted {
        iteration: boundary - 1,
    });
}

fn stop_active<P>(active: &mut Option<ActivePlayback<P>>, stopped: &Arc<AtomicBool>) {
    if let Some(playback) = active.take() {
        stopped.store(true, Ordering::SeqCst);
        playback.sealed.store(true, Ordering::SeqCst);
        if playback.dispatcher.join().is_err() {
            warn!("dispatch thread panicked");
        }
        debug!("playback stopped");
    }
}

/// Walks the queued actions in fire-time order, sleeping until each is due.
/// The stop flag is re-checked immediately before every sink call, so once
/// stop is observed nothing further fires.
fn dispatch_thread<S: Sink>(
    mut consumer: HeapCons<ScheduledAction<S::Payload>>,
    sink: Arc<S>,
    start: Instant,
    stopped: Arc<AtomicBool>,
    sealed: Arc<AtomicBool>,
    update_tx: Sender<TransportUpdate>,
) {
    let mut pending: Option<ScheduledAction<S::Payload>> = None;

    loop {
        if stopped.load(Ordering::SeqCst) {
            return;
        }

        let Some(action) = pending.take().or_else(|| consumer.try_pop()) else {
            // Sealing happens after the final push, so empty-and-sealed
            // means the schedule really is exhausted.
            if sealed.load(Ordering::SeqCst) {
                if !stopped.load(Ordering::SeqCst) {
                    let _ = update_tx.send(TransportUpdate::Finished);
                }
                return;
            }
            thread::sleep(IDLE_POLL);
            continue;
        };

        let due = start + action.fire_at;
        let now = Instant::now();
        if due > now {
            thread::sleep((due - now).min(WAIT_SLICE));
            pending = Some(action);
            continue;
        }

        if stopped.load(Ordering::SeqCst) {
            return;
        }
        dispatch(&*sink, &action.action);
    }
}

/// A sink failure is isolated to its own event; the rest of the schedule
/// keeps firing.
fn dispatch<S: Sink>(sink: &S, action: &Action<S::Payload>) {
    let result = match action {
        Action::Activate { payload, amplitude } => sink.activate(payload, *amplitude),
        Action::Deactivate { payload } => sink.deactivate(payload),
    };
    if let Err(e) = result {
        warn!("sink call failed: {e}");
    }
}
