//! Replay recorder
//!
//! Writes `.evo` files: the `EVO1` magic, a little-endian u32 header length,
//! a JSON header, then raw little-endian f32 state frames. The reader and
//! the viewer live outside the core.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use candle_core::Tensor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const MAGIC_BYTES: &[u8; 4] = b"EVO1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvoConfig {
    pub n_agents: usize,
    pub state_dims: usize,
    pub state_labels: Vec<String>,
    pub dt: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvoHeader {
    pub version: u32,
    pub timestamp: String,
    pub config: EvoConfig,
}

impl EvoHeader {
    pub fn new(config: EvoConfig) -> Self {
        let now: DateTime<Utc> = Utc::now();
        Self {
            version: 1,
            timestamp: now.to_rfc3339(),
            config,
        }
    }
}

pub struct EvoRecorder {
    writer: BufWriter<File>,
    header: EvoHeader,
    frames_written: u64,
}

impl EvoRecorder {
    pub fn create<P: AsRef<Path>>(path: P, header: EvoHeader) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let header_json = serde_json::to_vec(&header)?;
        let header_len = header_json.len() as u32;

        writer.write_all(MAGIC_BYTES)?;
        writer.write_all(&header_len.to_le_bytes())?;
        writer.write_all(&header_json)?;

        Ok(Self {
            writer,
            header,
            frames_written: 0,
        })
    }

    pub fn write_frame(&mut self, state: &Tensor) -> Result<()> {
        let dims = state.dims();
        if dims.len() != 2
            || dims[0] != self.header.config.n_agents
            || dims[1] != self.header.config.state_dims
        {
            return Err(candle_core::Error::Msg(format!(
                "state shape mismatch: expected ({}, {}), got {:?}",
                self.header.config.n_agents, self.header.config.state_dims, dims
            ))
            .into());
        }

        let frame = state.to_vec2::<f32>()?;
        for row in frame.iter() {
            for value in row.iter() {
                self.writer.write_all(&value.to_le_bytes())?;
            }
        }

        self.frames_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn header(&self) -> &EvoHeader {
        &self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use std::fs;

    #[test]
    fn test_writes_header_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorder_test.evo");

        let header = EvoHeader::new(EvoConfig {
            n_agents: 2,
            state_dims: 3,
            state_labels: vec![
                "pos_x".to_string(),
                "vel_x".to_string(),
                "energy".to_string(),
            ],
            dt: 0.1,
        });

        let mut recorder = EvoRecorder::create(&path, header.clone()).unwrap();
        let state = Tensor::from_vec(
            vec![1f32, 2., 3., 4., 5., 6.],
            (2, 3),
            &Device::Cpu,
        )
        .unwrap();
        recorder.write_frame(&state).unwrap();
        recorder.flush().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], MAGIC_BYTES);

        let header_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let parsed: EvoHeader =
            serde_json::from_slice(&bytes[8..8 + header_len]).unwrap();
        assert_eq!(parsed, header);

        let body = &bytes[8 + header_len..];
        let values: Vec<f32> = body
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![1., 2., 3., 4., 5., 6.]);
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_shape.evo");
        let header = EvoHeader::new(EvoConfig {
            n_agents: 2,
            state_dims: 3,
            state_labels: vec![],
            dt: 0.1,
        });
        let mut recorder = EvoRecorder::create(&path, header).unwrap();
        let state = Tensor::zeros((4, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(recorder.write_frame(&state).is_err());
    }
}
