//! Level Analyzer - Lautstärke eines Live-Streams

use super::stream::MediaStream;

/// RMS-Schwellen für die Sprechpegel 1..=4 (darunter: 0 = still)
pub const LOUDNESS_THRESHOLDS: [f32; 4] = [0.01, 0.03, 0.08, 0.2];

/// Misst den aktuellen Pegel eines Streams
#[derive(Debug, Clone)]
pub struct LevelAnalyzer {
    stream: MediaStream,
}

impl LevelAnalyzer {
    pub fn new(stream: MediaStream) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    /// Aktueller Pegel (RMS, 0.0 - 1.0)
    pub fn level(&self) -> f32 {
        if self.stream.is_ended() {
            return 0.0;
        }
        rms(&self.stream.analysis_window())
    }
}

/// Root Mean Square der Samples, auf 1.0 begrenzt
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt().min(1.0)
}

/// Quantisiert einen Pegel auf eine Sprechstufe (0 = still, 4 = laut)
pub fn talking_loudness_level(level: f32) -> u8 {
    LOUDNESS_THRESHOLDS
        .iter()
        .take_while(|&&threshold| level >= threshold)
        .count() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 32]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[4.0, 4.0]), 1.0);
    }

    #[test]
    fn test_talking_loudness_level_buckets() {
        assert_eq!(talking_loudness_level(0.0), 0);
        assert_eq!(talking_loudness_level(0.009), 0);
        assert_eq!(talking_loudness_level(0.01), 1);
        assert_eq!(talking_loudness_level(0.05), 2);
        assert_eq!(talking_loudness_level(0.1), 3);
        assert_eq!(talking_loudness_level(0.2), 4);
        assert_eq!(talking_loudness_level(1.0), 4);
    }

    #[test]
    fn test_analyzer_follows_stream() {
        let stream = MediaStream::new("s1");
        let analyzer = LevelAnalyzer::new(stream.clone());
        assert_eq!(analyzer.level(), 0.0);

        stream.push_samples(&[0.3; 2048]);
        assert!((analyzer.level() - 0.3).abs() < 1e-4);

        stream.stop();
        assert_eq!(analyzer.level(), 0.0);
    }
}
