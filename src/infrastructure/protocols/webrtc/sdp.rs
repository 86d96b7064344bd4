//! SDP compatibility transforms between the local WebRTC engine and the
//! call-control backend.
//!
//! The backend rejects offers containing attributes it does not understand,
//! and it (or the third-party stack behind it) sometimes omits attributes the
//! local engine insists on. Both directions are plain line-level rewrites.

const CRLF: &str = "\r\n";

/// Media identification used when the remote description carries none
pub const DEFAULT_MID: &str = "0";

fn split_lines(sdp: &str) -> Vec<&str> {
    sdp.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .collect()
}

fn join_lines(lines: &[&str]) -> String {
    let mut out = lines.join(CRLF);
    out.push_str(CRLF);
    out
}

/// `a=candidate:<foundation> <component> <transport> <priority> <address> <port> typ ...`
fn is_ipv6_candidate(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("a=candidate:") else {
        return false;
    };
    rest.split_whitespace()
        .nth(4)
        .map_or(false, |address| address.contains(':'))
}

fn is_stripped_outbound(line: &str) -> bool {
    is_ipv6_candidate(line)
        || line.starts_with("a=rtcp-fb:")
        || line.starts_with("a=extmap:")
        || line == "a=extmap-allow-mixed"
}

/// Local description -> backend.
///
/// Drops IPv6 candidates, RTCP feedback, header extensions and
/// `extmap-allow-mixed`.
pub fn to_backend(sdp: &str) -> String {
    let lines: Vec<&str> = split_lines(sdp)
        .into_iter()
        .filter(|line| !is_stripped_outbound(line))
        .collect();
    join_lines(&lines)
}

/// Backend description -> local engine.
///
/// Adds `a=mid` after the first media line and a session-level
/// `a=group:BUNDLE` referencing it, each only when missing.
pub fn from_backend(sdp: &str) -> String {
    let mut lines: Vec<String> = split_lines(sdp).into_iter().map(str::to_string).collect();

    let Some(first_media) = lines.iter().position(|l| l.starts_with("m=")) else {
        return join_owned(&lines);
    };

    let mid = match lines.iter().find_map(|l| l.strip_prefix("a=mid:")) {
        Some(mid) => mid.trim().to_string(),
        None => {
            lines.insert(first_media + 1, format!("a=mid:{}", DEFAULT_MID));
            DEFAULT_MID.to_string()
        }
    };

    if !lines.iter().any(|l| l.starts_with("a=group:BUNDLE")) {
        // Session-level attributes must precede the first media section.
        lines.insert(first_media, format!("a=group:BUNDLE {}", mid));
    }

    join_owned(&lines)
}

fn join_owned(lines: &[String]) -> String {
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    join_lines(&refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL_OFFER: &str = "v=0\r\n\
o=- 123 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0\r\n\
a=extmap-allow-mixed\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 0\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtcp-fb:111 transport-cc\r\n\
a=extmap:1 http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01\r\n\
a=candidate:1 1 udp 2130706431 192.168.1.10 50000 typ host\r\n\
a=candidate:2 1 udp 2130706431 fe80::1 50002 typ host\r\n\
a=sendrecv\r\n";

    #[test]
    fn test_to_backend_strips_unsupported_attributes() {
        let out = to_backend(LOCAL_OFFER);
        assert!(!out.contains("a=rtcp-fb:"));
        assert!(!out.contains("a=extmap:"));
        assert!(!out.contains("a=extmap-allow-mixed"));
        assert!(!out.contains("fe80::1"));
        assert!(out.contains("192.168.1.10 50000 typ host"));
        assert!(out.contains("a=rtpmap:111 opus/48000/2"));
        assert!(out.ends_with("a=sendrecv\r\n"));
    }

    #[test]
    fn test_to_backend_keeps_ipv4_connection_lines() {
        let out = to_backend("v=0\nc=IN IP4 10.0.0.1\nm=audio 9 RTP/AVP 0\n");
        assert_eq!(out, "v=0\r\nc=IN IP4 10.0.0.1\r\nm=audio 9 RTP/AVP 0\r\n");
    }

    #[test]
    fn test_from_backend_injects_mid_and_bundle() {
        let remote = "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 5004 UDP/TLS/RTP/SAVPF 0\r\nc=IN IP4 10.0.0.1\r\na=sendrecv\r\n";
        let out = from_backend(remote);
        let lines: Vec<&str> = out.split("\r\n").collect();

        let bundle = lines.iter().position(|l| *l == "a=group:BUNDLE 0").unwrap();
        let media = lines.iter().position(|l| l.starts_with("m=audio")).unwrap();
        assert!(bundle < media);
        assert_eq!(lines[media + 1], "a=mid:0");
    }

    #[test]
    fn test_from_backend_reuses_existing_mid() {
        let remote = "v=0\r\nm=audio 5004 RTP/SAVPF 0\r\na=mid:audio\r\n";
        let out = from_backend(remote);
        assert!(out.contains("a=group:BUNDLE audio\r\nm=audio"));
        assert_eq!(out.matches("a=mid:").count(), 1);
    }

    #[test]
    fn test_from_backend_is_idempotent() {
        let once = from_backend("v=0\r\nm=audio 1 RTP/SAVPF 0\r\n");
        assert_eq!(from_backend(&once), once);
    }
}
