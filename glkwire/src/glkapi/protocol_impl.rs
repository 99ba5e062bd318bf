/*

Protocol implementation helpers
===============================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use super::common::*;
use super::protocol::*;

impl Default for NormalisedMetrics {
    fn default() -> Self {
        NormalisedMetrics {
            buffercharheight: 1.0,
            buffercharwidth: 1.0,
            buffermarginx: 0.0,
            buffermarginy: 0.0,
            graphicsmarginx: 0.0,
            graphicsmarginy: 0.0,
            gridcharheight: 1.0,
            gridcharwidth: 1.0,
            gridmarginx: 0.0,
            gridmarginy: 0.0,
            height: 50.0,
            inspacingx: 0.0,
            inspacingy: 0.0,
            outspacingx: 0.0,
            outspacingy: 0.0,
            width: 80.0,
        }
    }
}

impl NormalisedMetrics {
    fn apply_unnormalised(&mut self, metrics: &Metrics) {
        if let Some(val) = metrics.buffercharheight {
            self.buffercharheight = val;
        }
        if let Some(val) = metrics.buffercharwidth {
            self.buffercharwidth = val;
        }
        if let Some(val) = metrics.buffermarginx {
            self.buffermarginx = val;
        }
        if let Some(val) = metrics.buffermarginy {
            self.buffermarginy = val;
        }
        if let Some(val) = metrics.graphicsmarginx {
            self.graphicsmarginx = val;
        }
        if let Some(val) = metrics.graphicsmarginy {
            self.graphicsmarginy = val;
        }
        if let Some(val) = metrics.gridcharheight {
            self.gridcharheight = val;
        }
        if let Some(val) = metrics.gridcharwidth {
            self.gridcharwidth = val;
        }
        if let Some(val) = metrics.gridmarginx {
            self.gridmarginx = val;
        }
        if let Some(val) = metrics.gridmarginy {
            self.gridmarginy = val;
        }
        if let Some(val) = metrics.inspacingx {
            self.inspacingx = val;
        }
        if let Some(val) = metrics.inspacingy {
            self.inspacingy = val;
        }
        if let Some(val) = metrics.outspacingx {
            self.outspacingx = val;
        }
        if let Some(val) = metrics.outspacingy {
            self.outspacingy = val;
        }
    }
}

impl TryFrom<Metrics> for NormalisedMetrics {
    type Error = GlkApiError;

    fn try_from(metrics: Metrics) -> GlkResult<Self> {
        let mut normalised = NormalisedMetrics {
            width: metrics.width
                .ok_or_else(|| GlkApiError::MalformedInput("metrics require width".to_string()))?,
            height: metrics.height
                .ok_or_else(|| GlkApiError::MalformedInput("metrics require height".to_string()))?,
            ..Default::default()
        };

        if let Some(val) = metrics.charheight {
            normalised.buffercharheight = val;
            normalised.gridcharheight = val;
        }
        if let Some(val) = metrics.charwidth {
            normalised.buffercharwidth = val;
            normalised.gridcharwidth = val;
        }

        if let Some(val) = metrics.margin {
            normalised.buffermarginx = val;
            normalised.buffermarginy = val;
            normalised.graphicsmarginx = val;
            normalised.graphicsmarginy = val;
            normalised.gridmarginx = val;
            normalised.gridmarginy = val;
        }
        if let Some(val) = metrics.buffermargin {
            normalised.buffermarginx = val;
            normalised.buffermarginy = val;
        }
        if let Some(val) = metrics.graphicsmargin {
            normalised.graphicsmarginx = val;
            normalised.graphicsmarginy = val;
        }
        if let Some(val) = metrics.gridmargin {
            normalised.gridmarginx = val;
            normalised.gridmarginy = val;
        }
        if let Some(val) = metrics.marginx {
            normalised.buffermarginx = val;
            normalised.graphicsmarginx = val;
            normalised.gridmarginx = val;
        }
        if let Some(val) = metrics.marginy {
            normalised.buffermarginy = val;
            normalised.graphicsmarginy = val;
            normalised.gridmarginy = val;
        }

        if let Some(val) = metrics.spacing {
            normalised.inspacingx = val;
            normalised.inspacingy = val;
            normalised.outspacingx = val;
            normalised.outspacingy = val;
        }
        if let Some(val) = metrics.inspacing {
            normalised.inspacingx = val;
            normalised.inspacingy = val;
        }
        if let Some(val) = metrics.outspacing {
            normalised.outspacingx = val;
            normalised.outspacingy = val;
        }
        if let Some(val) = metrics.spacingx {
            normalised.inspacingx = val;
            normalised.outspacingx = val;
        }
        if let Some(val) = metrics.spacingy {
            normalised.inspacingy = val;
            normalised.outspacingy = val;
        }

        normalised.apply_unnormalised(&metrics);

        if normalised.gridcharwidth <= 0.0 || normalised.gridcharheight <= 0.0
            || normalised.buffercharwidth <= 0.0 || normalised.buffercharheight <= 0.0 {
            return Err(GlkApiError::CharSizeMustBePositive);
        }

        Ok(normalised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GlkResult<NormalisedMetrics> {
        let metrics: Metrics = serde_json::from_str(json).unwrap();
        metrics.try_into()
    }

    #[test]
    fn alias_collapsing() {
        let normalised = parse(r#"{"width":80,"height":24,"charwidth":2,"charheight":3,"margin":4,"spacing":5}"#).unwrap();
        assert_eq!(normalised.gridcharwidth, 2.0);
        assert_eq!(normalised.buffercharwidth, 2.0);
        assert_eq!(normalised.gridcharheight, 3.0);
        assert_eq!(normalised.buffercharheight, 3.0);
        assert_eq!(normalised.buffermarginx, 4.0);
        assert_eq!(normalised.graphicsmarginy, 4.0);
        assert_eq!(normalised.inspacingx, 5.0);
        assert_eq!(normalised.outspacingy, 5.0);
    }

    #[test]
    fn specific_keys_override() {
        let normalised = parse(r#"{"width":80,"height":24,"charwidth":2,"gridcharwidth":7,"margin":4,"buffermarginx":9}"#).unwrap();
        assert_eq!(normalised.gridcharwidth, 7.0);
        assert_eq!(normalised.buffercharwidth, 2.0);
        assert_eq!(normalised.buffermarginx, 9.0);
        assert_eq!(normalised.buffermarginy, 4.0);
        assert_eq!(normalised.gridmarginx, 4.0);
    }

    #[test]
    fn bad_char_sizes_are_fatal() {
        let err = parse(r#"{"width":80,"height":24,"charwidth":0,"charheight":1}"#).unwrap_err();
        assert!(err.is_fatal());
        assert!(parse(r#"{"width":80,"height":24,"buffercharheight":-2}"#).is_err());
    }

    #[test]
    fn missing_dimensions_are_fatal() {
        assert!(parse(r#"{"height":24}"#).is_err());
        assert!(parse(r#"{"width":80}"#).is_err());
    }
}
