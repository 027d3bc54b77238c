// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Shared test helpers: temp directories and a minimal MCAP record
//! walker for order-sensitive assertions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use roborec::io::formats::mcap::constants::{
    MCAP_MAGIC, OP_ATTACHMENT, OP_CHANNEL, OP_DATA_END, OP_FOOTER, OP_HEADER, OP_MESSAGE,
    OP_METADATA, OP_SCHEMA, OP_STATISTICS,
};

/// Unique temp directory per test invocation.
pub fn temp_dir(name: &str) -> PathBuf {
    let random = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let thread_id = format!("{:?}", std::thread::current().id());
    std::env::temp_dir().join(format!(
        "roborec_{}_{}_{}_{}",
        name,
        std::process::id(),
        thread_id,
        random
    ))
}

/// Removes its directory on drop.
#[derive(Debug)]
pub struct CleanupGuard(pub PathBuf);

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Sorted list of .mcap files in a directory.
pub fn mcap_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map(|e| e == "mcap").unwrap_or(false))
        .collect();
    files.sort();
    files
}

#[derive(Debug, Clone)]
pub struct RecordedSchema {
    pub id: u16,
    pub name: String,
    pub encoding: String,
    pub data: Vec<u8>,
    /// Position among data-section records
    pub order: usize,
}

#[derive(Debug, Clone)]
pub struct RecordedChannel {
    pub id: u16,
    pub schema_id: u16,
    pub topic: String,
    pub message_encoding: String,
    pub metadata: HashMap<String, String>,
    pub order: usize,
}

#[derive(Debug, Clone)]
pub struct RecordedMessage {
    pub channel_id: u16,
    pub sequence: u32,
    pub log_time: u64,
    pub publish_time: u64,
    pub data: Vec<u8>,
    pub order: usize,
}

#[derive(Debug, Clone)]
pub struct RecordedAttachment {
    pub name: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Contents of one recorded file, data section and summary split apart.
#[derive(Debug, Default)]
pub struct RecordedFile {
    pub schemas: Vec<RecordedSchema>,
    pub channels: Vec<RecordedChannel>,
    pub messages: Vec<RecordedMessage>,
    pub attachments: Vec<RecordedAttachment>,
    pub metadata: Vec<(String, HashMap<String, String>)>,
    /// Schema records repeated in the summary section
    pub summary_schemas: usize,
    /// Channel records repeated in the summary section
    pub summary_channels: usize,
    pub has_statistics: bool,
}

impl RecordedFile {
    pub fn channel_by_topic(&self, topic: &str) -> Option<&RecordedChannel> {
        self.channels.iter().find(|c| c.topic == topic)
    }

    pub fn schema_by_name(&self, name: &str) -> Option<&RecordedSchema> {
        self.schemas.iter().find(|s| s.name == name)
    }

    pub fn attachment(&self, name: &str) -> Option<&RecordedAttachment> {
        self.attachments.iter().find(|a| a.name == name)
    }
}

/// Walk every record of an MCAP file.
pub fn read_mcap(path: &Path) -> RecordedFile {
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(&bytes[0..8], MCAP_MAGIC, "missing opening magic");
    assert_eq!(
        &bytes[bytes.len() - 8..],
        MCAP_MAGIC,
        "missing closing magic"
    );

    let mut cursor = Cursor::new(&bytes[..bytes.len() - 8]);
    cursor.set_position(8);

    let mut file = RecordedFile::default();
    let mut order = 0usize;
    let mut in_summary = false;

    loop {
        let opcode = cursor.read_u8().unwrap();
        let length = cursor.read_u64::<LittleEndian>().unwrap();
        let start = cursor.position();

        match opcode {
            OP_HEADER => {}
            OP_DATA_END => in_summary = true,
            OP_SCHEMA => {
                let id = cursor.read_u16::<LittleEndian>().unwrap();
                let name = read_string(&mut cursor);
                let encoding = read_string(&mut cursor);
                let data_len = cursor.read_u32::<LittleEndian>().unwrap() as usize;
                let data = read_bytes(&mut cursor, data_len);
                if in_summary {
                    file.summary_schemas += 1;
                } else {
                    file.schemas.push(RecordedSchema {
                        id,
                        name,
                        encoding,
                        data,
                        order,
                    });
                }
            }
            OP_CHANNEL => {
                let id = cursor.read_u16::<LittleEndian>().unwrap();
                let schema_id = cursor.read_u16::<LittleEndian>().unwrap();
                let topic = read_string(&mut cursor);
                let message_encoding = read_string(&mut cursor);
                let metadata = read_string_map(&mut cursor);
                if in_summary {
                    file.summary_channels += 1;
                } else {
                    file.channels.push(RecordedChannel {
                        id,
                        schema_id,
                        topic,
                        message_encoding,
                        metadata,
                        order,
                    });
                }
            }
            OP_MESSAGE => {
                let channel_id = cursor.read_u16::<LittleEndian>().unwrap();
                let sequence = cursor.read_u32::<LittleEndian>().unwrap();
                let log_time = cursor.read_u64::<LittleEndian>().unwrap();
                let publish_time = cursor.read_u64::<LittleEndian>().unwrap();
                let data = read_bytes(&mut cursor, (length - 22) as usize);
                file.messages.push(RecordedMessage {
                    channel_id,
                    sequence,
                    log_time,
                    publish_time,
                    data,
                    order,
                });
            }
            OP_ATTACHMENT => {
                let _log_time = cursor.read_u64::<LittleEndian>().unwrap();
                let _create_time = cursor.read_u64::<LittleEndian>().unwrap();
                let name = read_string(&mut cursor);
                let media_type = read_string(&mut cursor);
                let data_len = cursor.read_u64::<LittleEndian>().unwrap() as usize;
                let data = read_bytes(&mut cursor, data_len);
                let _crc = cursor.read_u32::<LittleEndian>().unwrap();
                file.attachments.push(RecordedAttachment {
                    name,
                    media_type,
                    data,
                });
            }
            OP_METADATA => {
                let name = read_string(&mut cursor);
                let map = read_string_map(&mut cursor);
                file.metadata.push((name, map));
            }
            OP_STATISTICS => file.has_statistics = true,
            OP_FOOTER => {
                cursor.set_position(start + length);
                break;
            }
            other => panic!("unexpected opcode 0x{other:02X}"),
        }

        cursor.set_position(start + length);
        order += 1;
    }

    assert_eq!(
        cursor.position(),
        (bytes.len() - 8) as u64,
        "trailing bytes before closing magic"
    );
    file
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> String {
    let len = cursor.read_u32::<LittleEndian>().unwrap() as usize;
    String::from_utf8(read_bytes(cursor, len)).unwrap()
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> Vec<u8> {
    let start = cursor.position() as usize;
    let data = cursor.get_ref()[start..start + len].to_vec();
    cursor.set_position((start + len) as u64);
    data
}

fn read_string_map(cursor: &mut Cursor<&[u8]>) -> HashMap<String, String> {
    let total = cursor.read_u32::<LittleEndian>().unwrap() as u64;
    let end = cursor.position() + total;
    let mut map = HashMap::new();
    while cursor.position() < end {
        let key = read_string(cursor);
        let value = read_string(cursor);
        map.insert(key, value);
    }
    map
}
