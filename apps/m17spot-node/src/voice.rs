//! Local voice commands and canned-message playback. Messages are lists
//! of word file stems; each `.dat` file in the audio folder holds raw
//! 8-byte Codec2 3200 half-payloads. Playback streams them to the modem
//! as broadcast voice frames at the 40 ms frame cadence.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use log::{info, warn};
use m17spot_core::{
    callsign_code, Callsign, Crc16, FrameType, Packet, PayloadType, TypeVersion, EOT_BIT,
    SILENT_C2_3200,
};

/// Frames shorter than a second are noise; longer than two minutes is
/// somebody sitting on the key.
pub const MIN_ECHO_FRAMES: usize = 25;
pub const MAX_ECHO_FRAMES: usize = 3000;
/// An echo recording with no fresh frame for this long is finished.
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(2);

const FRAME_CADENCE: Duration = Duration::from_millis(40);
const PLAYBACK_TAIL: Duration = Duration::from_millis(200);

/// Local command destinations, matched against the base-40 code of the
/// incoming destination with any module stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Echo,
    Status,
    Unlink,
    Record(char),
    Play(char),
}

const CODE_E: u64 = callsign_code("E");
const CODE_ECHO: u64 = callsign_code("ECHO");
const CODE_I: u64 = callsign_code("I");
const CODE_STATUS: u64 = callsign_code("STATUS");
const CODE_U: u64 = callsign_code("U");
const CODE_UNLINK: u64 = callsign_code("UNLINK");
const CODE_RECORD: u64 = callsign_code("RECORD");
const CODE_PLAY: u64 = callsign_code("PLAY");

impl Command {
    #[must_use]
    pub fn parse(dst: &Callsign) -> Option<Self> {
        match dst.base() {
            CODE_E | CODE_ECHO => Some(Self::Echo),
            CODE_I | CODE_STATUS => Some(Self::Status),
            CODE_U | CODE_UNLINK => Some(Self::Unlink),
            CODE_RECORD => match dst.module() {
                ' ' => None,
                m => Some(Self::Record(m)),
            },
            CODE_PLAY => match dst.module() {
                ' ' => None,
                m => Some(Self::Play(m)),
            },
            _ => None,
        }
    }
}

/// The spoken dictionary: `speak.index` lines are `index start stop
/// length`, pointing into 8-byte half-payload records of `speak.dat`.
/// Indexes follow the base-40 alphabet, with the phonetic alphabet at
/// 40..=65 and the word "M17" at 66.
pub struct WordBank {
    spans: HashMap<u32, (u32, u32)>,
    data: Vec<u8>,
}

const PHONETIC_BASE: u32 = 40;
const WORD_M17: u32 = 66;
const MIN_WORDS: usize = 67;

impl WordBank {
    pub fn load(folder: &Path) -> std::io::Result<Self> {
        let index = fs::read_to_string(folder.join("speak.index"))?;
        let mut spans = HashMap::new();
        for line in index.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut f = line.split_whitespace();
            let parsed = (
                f.next().and_then(|v| v.parse::<u32>().ok()),
                f.next().and_then(|v| v.parse::<u32>().ok()),
                f.next().and_then(|v| v.parse::<u32>().ok()),
            );
            if let (Some(index), Some(start), Some(stop)) = parsed {
                spans.insert(index, (start, stop));
            } else {
                warn!("bad speak.index line ignored: {line:?}");
            }
        }
        if spans.len() < MIN_WORDS {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("only {} words in speak.index", spans.len()),
            ));
        }
        let data = fs::read(folder.join("speak.dat"))?;
        Ok(Self { spans, data })
    }

    /// Half-payload records of one word, empty when unknown.
    #[must_use]
    pub fn word(&self, index: u32) -> &[u8] {
        let Some(&(start, stop)) = self.spans.get(&index) else {
            return &[];
        };
        let from = 8 * start as usize;
        let to = 8 * (stop as usize + 1);
        self.data.get(from..to.min(self.data.len())).unwrap_or(&[])
    }

    /// Build the spoken rendition of a callsign as a `.dat` word file:
    /// letters and digits from the alphabet words, "M17" as one word,
    /// the module as its phonetic-alphabet word.
    pub fn make_callsign_file(&self, cs: &Callsign, out: &Path) -> std::io::Result<()> {
        let mut data = Vec::new();
        let base = cs.padded(8);
        let base = base.trim_end();
        let bytes = base.as_bytes();
        let mut pos = 0usize;
        while pos < bytes.len() {
            if bytes[pos..].starts_with(b"M17") {
                data.extend_from_slice(self.word(WORD_M17));
                data.extend_from_slice(&quiet_halves(3));
                pos += 3;
                continue;
            }
            match alphabet_index(bytes[pos]) {
                // a space inside a callsign gets 200 ms of quiet
                0 => data.extend_from_slice(&quiet_halves(10)),
                index => {
                    data.extend_from_slice(self.word(index));
                    data.extend_from_slice(&quiet_halves(3));
                }
            }
            pos += 1;
        }
        let module = cs.module();
        if module != ' ' {
            data.extend_from_slice(self.word(PHONETIC_BASE + (module as u32 - 'A' as u32)));
        }
        info!("built {} for {}", out.display(), cs.text());
        fs::write(out, data)
    }
}

fn alphabet_index(c: u8) -> u32 {
    match c {
        b'A'..=b'Z' => u32::from(c - b'A') + 1,
        b'0'..=b'9' => u32::from(c - b'0') + 27,
        b'-' => 37,
        b'/' => 38,
        b'.' => 39,
        _ => 0,
    }
}

fn quiet_halves(n: usize) -> Vec<u8> {
    SILENT_C2_3200.repeat(n)
}

/// Gather the half-payloads of a word-stem message: 320 ms of leading
/// quiet, each word's `.dat` file, 100 ms of quiet between words.
/// Missing files are skipped with a warning.
#[must_use]
pub fn message_halves(folder: &Path, message: &str) -> Vec<u8> {
    let mut halves = quiet_halves(16);
    let words: Vec<&str> = message.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        let path = folder.join(format!("{word}.dat"));
        match fs::read(&path) {
            Ok(data) => {
                if data.is_empty() || data.len() % 8 != 0 {
                    warn!("{} is not a half-payload file", path.display());
                }
                halves.extend_from_slice(&data[..data.len() - data.len() % 8]);
            }
            Err(_) => {
                warn!("{} does not exist", path.display());
                continue;
            }
        }
        if i + 1 < words.len() {
            halves.extend_from_slice(&quiet_halves(5));
        }
    }
    halves
}

/// A voice stream frame template: broadcast destination, our callsign,
/// C2 3200 with the node CAN.
#[must_use]
pub fn master_frame(
    my_cs: &Callsign,
    can: u8,
    version: TypeVersion,
    sid: u16,
) -> Packet {
    let mut ft = FrameType::new();
    ft.set_payload(PayloadType::Voice3200);
    ft.set_can(can);
    let mut p = Packet::stream();
    p.set_stream_id(sid);
    p.set_dst(&[0xff; 6]);
    let mut src = [0u8; 6];
    my_cs.code_out(&mut src);
    p.set_src(&src);
    p.set_frame_type(ft.wire(version));
    p
}

/// Pair half-payloads into sealed stream frames, numbering from zero
/// with the EOT bit on the last. An odd tail half is padded with quiet.
#[must_use]
pub fn build_stream(master: &Packet, halves: &[u8], crc: &Crc16) -> Vec<Packet> {
    let mut halves = halves.to_vec();
    if halves.len() % 16 != 0 {
        let pad = 16 - halves.len() % 16;
        halves.extend_from_slice(&quiet_halves(pad / 8 + usize::from(pad % 8 != 0))[..pad]);
    }
    let total = halves.len() / 16;
    let mut out = Vec::with_capacity(total);
    for (i, payload) in halves.chunks_exact(16).enumerate() {
        let mut p = master.clone();
        let mut fn_ = (i % 0x8000) as u16;
        if i + 1 == total {
            fn_ |= EOT_BIT;
        }
        p.set_frame_number(fn_);
        p.payload_mut().copy_from_slice(payload);
        p.seal_crc(crc);
        out.push(p);
    }
    out
}

/// Ship frames to the modem at the RF cadence, then linger long enough
/// for the modem to drain.
pub fn play(frames: Vec<Packet>, to_modem: &Sender<Packet>) {
    let mut clock = Instant::now();
    let count = frames.len();
    for frame in frames {
        clock += FRAME_CADENCE;
        if let Some(wait) = clock.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
        if to_modem.send(frame).is_err() {
            warn!("modem channel closed during playback");
            return;
        }
    }
    info!("played {count} voice frames");
    std::thread::sleep(PLAYBACK_TAIL);
}

/// Accumulates the payloads of one incoming RF stream for later replay.
#[derive(Debug)]
pub struct Recorder {
    sid: u16,
    name: String,
    halves: Vec<u8>,
    last: Instant,
}

impl Recorder {
    #[must_use]
    pub fn new(sid: u16, name: &str, now: Instant) -> Self {
        info!("recording stream 0x{sid:04x} as {name}");
        Self {
            sid,
            name: name.into(),
            halves: Vec::new(),
            last: now,
        }
    }

    #[must_use]
    pub fn sid(&self) -> u16 {
        self.sid
    }

    pub fn add(&mut self, payload: &[u8], now: Instant) {
        if self.halves.len() < 16 * MAX_ECHO_FRAMES {
            self.halves.extend_from_slice(payload);
        }
        self.last = now;
    }

    #[must_use]
    pub fn timed_out(&self, now: Instant) -> bool {
        now.duration_since(self.last) >= ECHO_TIMEOUT
    }

    /// Write the recording as a word file; too-short recordings are
    /// discarded. Returns the word stem to play back.
    pub fn finish(self, folder: &Path) -> std::io::Result<Option<String>> {
        let frames = self.halves.len() / 16;
        if frames < MIN_ECHO_FRAMES {
            warn!("recording of {frames} frames is too short, discarded");
            return Ok(None);
        }
        let path: PathBuf = folder.join(format!("{}.dat", self.name));
        fs::write(&path, &self.halves)?;
        info!("saved {frames} frames to {}", path.display());
        Ok(Some(self.name))
    }
}
