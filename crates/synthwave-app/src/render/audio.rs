use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupLayout, BindGroupLayoutDescriptor, Device, Queue,
};

use crate::audio::AudioFeatureFrame;
use crate::error::RenderError;
use crate::gpu::audio_texture::{AudioTexture, HistoryCursor};

pub const AUDIO_SAMPLES: u32 = 1024;
pub const HISTORY_ROWS: u32 = 128;

pub const SPECTRUM_UNIT: u32 = 0;
pub const WAVEFORM_UNIT: u32 = 1;
pub const HISTORY_UNIT: u32 = 2;
pub const SMOOTHED_UNIT: u32 = 3;

/// The four audio textures and the shared bind group (group 1) that exposes them.
pub struct AudioTextures {
    spectrum: AudioTexture,
    waveform: AudioTexture,
    history: AudioTexture,
    smoothed: AudioTexture,
    cursor: HistoryCursor,
    pub layout: BindGroupLayout,
    pub bind_group: BindGroup,
}

impl AudioTextures {
    pub fn new(device: &Device) -> Result<Self, RenderError> {
        let spectrum = AudioTexture::new(device, "audio-spectrum", AUDIO_SAMPLES, SPECTRUM_UNIT)?;
        let waveform = AudioTexture::new(device, "audio-waveform", AUDIO_SAMPLES, WAVEFORM_UNIT)?;
        let history = AudioTexture::with_rows(
            device,
            "audio-history",
            AUDIO_SAMPLES,
            HISTORY_ROWS,
            HISTORY_UNIT,
        )?;
        let smoothed = AudioTexture::new(device, "audio-smoothed", AUDIO_SAMPLES, SMOOTHED_UNIT)?;

        let layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("audio-bgl"),
            entries: &[
                spectrum.layout_entry(),
                waveform.layout_entry(),
                history.layout_entry(),
                smoothed.layout_entry(),
            ],
        });
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("audio-bg"),
            layout: &layout,
            entries: &[spectrum.bind(), waveform.bind(), history.bind(), smoothed.bind()],
        });

        Ok(Self {
            spectrum,
            waveform,
            history,
            smoothed,
            cursor: HistoryCursor::new(HISTORY_ROWS),
            layout,
            bind_group,
        })
    }

    /// Uploads spectrum and waveform, appends the spectrum to the history.
    pub fn upload(&mut self, queue: &Queue, frame: &AudioFeatureFrame, smoothed: &[f32]) {
        self.spectrum.update(queue, &frame.spectrum);
        self.waveform.update(queue, &frame.waveform);
        self.smoothed.update(queue, smoothed);
        let row = self.cursor.advance();
        self.history.update_row(queue, row, &frame.spectrum);
    }

    /// Row the next spectrum will be written to.
    pub fn history_offset(&self) -> u32 {
        self.cursor.offset()
    }

    pub fn dispose(&mut self) {
        self.spectrum.dispose();
        self.waveform.dispose();
        self.history.dispose();
        self.smoothed.dispose();
    }
}
