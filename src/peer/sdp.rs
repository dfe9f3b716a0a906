//! Переупорядочивание payload type в SDP по предпочитаемым кодекам.

const LINE_END: &str = "\r\n";

/// Для каждой m-секции ставит payload type'ы подходящих кодеков первыми,
/// в порядке `preferred`. Имя кодека сравнивается без учёта регистра.
pub fn prefer_codecs(sdp: &str, preferred: &[String]) -> String {
    if preferred.is_empty() {
        return sdp.to_owned();
    }

    let mut lines: Vec<String> = sdp.split(LINE_END).map(str::to_owned).collect();
    let media_lines: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.starts_with("m="))
        .map(|(i, _)| i)
        .collect();

    for (n, &m_index) in media_lines.iter().enumerate() {
        let end = media_lines.get(n + 1).copied().unwrap_or(lines.len());
        let rtpmap = codec_payload_types(&lines[m_index + 1..end]);

        let mut parts: Vec<String> = lines[m_index].split(' ').map(str::to_owned).collect();
        if parts.len() <= 3 {
            continue;
        }
        let mut formats = parts.split_off(3);

        let mut front = Vec::new();
        for codec in preferred {
            let codec = codec.to_ascii_lowercase();
            for (pt, name) in &rtpmap {
                if *name == codec && formats.contains(pt) && !front.contains(pt) {
                    front.push(pt.clone());
                }
            }
        }
        if front.is_empty() {
            continue;
        }

        formats.retain(|pt| !front.contains(pt));
        parts.extend(front);
        parts.extend(formats);
        lines[m_index] = parts.join(" ");
    }

    lines.join(LINE_END)
}

/// `a=rtpmap:<pt> <name>/<clock>` → (pt, name в нижнем регистре)
fn codec_payload_types(section: &[String]) -> Vec<(String, String)> {
    section
        .iter()
        .filter_map(|line| line.strip_prefix("a=rtpmap:"))
        .filter_map(|rest| {
            let (pt, desc) = rest.split_once(' ')?;
            let name = desc.split('/').next()?;
            Some((pt.to_owned(), name.to_ascii_lowercase()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\n\
        o=- 1 1 IN IP4 0.0.0.0\r\n\
        s=-\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 0 111\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96 102 98\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=rtpmap:102 H264/90000\r\n\
        a=rtpmap:98 VP9/90000\r\n";

    #[test]
    fn test_h264_moves_to_front() {
        let out = prefer_codecs(SDP, &["h264".into()]);
        assert!(out.contains("m=video 9 UDP/TLS/RTP/SAVPF 102 96 98\r\n"));
        // аудио без H264 не трогаем
        assert!(out.contains("m=audio 9 UDP/TLS/RTP/SAVPF 0 111\r\n"));
    }

    #[test]
    fn test_preference_order_across_sections() {
        let out = prefer_codecs(SDP, &["VP9".into(), "H264".into(), "opus".into()]);
        assert!(out.contains("m=video 9 UDP/TLS/RTP/SAVPF 98 102 96\r\n"));
        assert!(out.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111 0\r\n"));
    }

    #[test]
    fn test_unknown_codec_is_noop() {
        assert_eq!(prefer_codecs(SDP, &["AV1".into()]), SDP);
        assert_eq!(prefer_codecs(SDP, &[]), SDP);
    }
}
